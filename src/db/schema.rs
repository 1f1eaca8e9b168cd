use rusqlite::Connection;

/// Initialize the database schema. Idempotent; safe to run at every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Teachers (license holders - one row per purchasing teacher)
        -- classes_count / tests_per_term feed the upload quota formula
        CREATE TABLE IF NOT EXISTS teachers (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            cin TEXT,
            phone TEXT,
            level TEXT,
            subject TEXT,
            classes_count INTEGER,
            tests_per_term INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_teachers_email ON teachers(email);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_teachers_cin ON teachers(cin) WHERE cin IS NOT NULL;

        -- Licenses (one per teacher subscription term)
        -- status transitions: active <-> suspended, active -> expired
        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL REFERENCES teachers(id) ON DELETE RESTRICT,
            key TEXT NOT NULL UNIQUE,
            allowed_devices INTEGER NOT NULL DEFAULT 1 CHECK (allowed_devices BETWEEN 1 AND 2),
            valid_until INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'suspended', 'expired')),
            upload_limit INTEGER NOT NULL,
            upload_count INTEGER NOT NULL DEFAULT 0 CHECK (upload_count >= 0),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_teacher ON licenses(teacher_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_status ON licenses(status);

        -- Activations (device slots claimed against a license)
        CREATE TABLE IF NOT EXISTS activations (
            id TEXT PRIMARY KEY,
            license_id TEXT NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
            device_id TEXT NOT NULL,
            user_agent TEXT,
            ip TEXT,
            metadata TEXT,
            activated_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            last_ip TEXT,
            UNIQUE(license_id, device_id)
        );
        -- Note: UNIQUE(license_id, device_id) creates implicit index for slot lookups
        CREATE INDEX IF NOT EXISTS idx_activations_license_time ON activations(license_id, activated_at DESC);

        -- Events (append-only lifecycle log; no UPDATE or DELETE paths)
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            license_id TEXT REFERENCES licenses(id) ON DELETE CASCADE,
            teacher_id TEXT REFERENCES teachers(id) ON DELETE SET NULL,
            type TEXT NOT NULL,
            message TEXT,
            metadata TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_license_time ON events(license_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
        CREATE INDEX IF NOT EXISTS idx_events_time ON events(created_at DESC);
        "#,
    )?;
    Ok(())
}
