//! All database access lives here. Handlers never touch SQL directly.
//!
//! Every critical section (device claims, upload metering, status flips)
//! runs inside an IMMEDIATE transaction so the read that justifies a write
//! and the write itself are a single unit under SQLite's writer lock.

use chrono::{Months, Utc};
use rusqlite::{params, types::Value, Connection, TransactionBehavior};
use uuid::Uuid;

use crate::error::{is_unique_violation, AppError, Result};
use crate::models::*;
use crate::quota::calculate_upload_limit;

use super::from_row::{
    query_all, query_one, FromRow, ACTIVATION_COLS, EVENT_COLS, LICENSE_COLS,
    LICENSE_WITH_TEACHER_COLS, TEACHER_COLS,
};

/// Validation events for the same device are collapsed to one per rolling day.
const VALIDATION_DEDUPE_SECS: i64 = 86_400;

/// Percentage of the upload ceiling at which the one-time warning fires.
const USAGE_WARNING_THRESHOLD: i64 = 90;

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a license key: MF-XXXXXX-XXXXXX (~60 bits entropy).
///
/// Ambiguous characters (0/O, 1/I) are excluded since keys are dictated over
/// the phone and typed by hand.
pub fn generate_license_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars().collect();

    let mut part = || -> String {
        (0..6)
            .map(|_| chars[rng.gen_range(0..chars.len())])
            .collect()
    };

    format!("MF-{}-{}", part(), part())
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
        }
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        self.fields.push(("updated_at", now().into()));
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Events ============

/// Append a lifecycle event. Events are never updated or deleted afterwards;
/// they disappear only through the FK cascade when their license is deleted.
pub fn insert_event(
    conn: &Connection,
    license_id: Option<&str>,
    teacher_id: Option<&str>,
    event_type: EventType,
    message: &str,
    metadata: Option<&serde_json::Value>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (id, license_id, teacher_id, type, message, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            gen_id(),
            license_id,
            teacher_id,
            event_type.as_ref(),
            message,
            metadata.map(|m| m.to_string()),
            now()
        ],
    )?;
    Ok(())
}

/// List events, newest first, optionally scoped by license key and type.
pub fn query_events(conn: &Connection, q: &EventQuery) -> Result<Vec<EventLog>> {
    let mut sql = format!("SELECT {} FROM events WHERE 1=1", EVENT_COLS);
    let mut values: Vec<Value> = Vec::new();

    if let Some(license_id) = &q.license_id {
        sql.push_str(" AND license_id = ?");
        values.push(license_id.clone().into());
    }
    if let Some(event_type) = &q.event_type {
        sql.push_str(" AND type = ?");
        values.push(event_type.clone().into());
    }
    sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
    values.push(q.limit().into());
    values.push(q.offset().into());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values), EventLog::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ Teachers ============

pub fn get_teacher(conn: &Connection, teacher_id: &str) -> Result<Option<Teacher>> {
    query_one(
        conn,
        &format!("SELECT {} FROM teachers WHERE id = ?1", TEACHER_COLS),
        &[&teacher_id],
    )
}

pub fn get_teacher_by_email(conn: &Connection, email: &str) -> Result<Option<Teacher>> {
    query_one(
        conn,
        &format!("SELECT {} FROM teachers WHERE email = ?1", TEACHER_COLS),
        &[&email.to_lowercase()],
    )
}

/// Insert or refresh the teacher row for an issuance. Email is the identity;
/// a second license for a known email reuses (and updates) the same teacher.
fn upsert_teacher(conn: &Connection, input: &IssueLicense) -> Result<Teacher> {
    let email = input.email.trim().to_lowercase();
    let ts = now();

    let existing: Option<Teacher> = query_one(
        conn,
        &format!("SELECT {} FROM teachers WHERE email = ?1", TEACHER_COLS),
        &[&email],
    )?;

    let result = match existing {
        Some(teacher) => {
            conn.execute(
                "UPDATE teachers SET full_name = ?1, cin = ?2, phone = COALESCE(?3, phone),
                        level = COALESCE(?4, level), subject = COALESCE(?5, subject),
                        classes_count = COALESCE(?6, classes_count),
                        tests_per_term = COALESCE(?7, tests_per_term), updated_at = ?8
                 WHERE id = ?9",
                params![
                    input.full_name,
                    input.cin,
                    input.phone,
                    input.level,
                    input.subject,
                    input.classes_count,
                    input.tests_per_term,
                    ts,
                    teacher.id
                ],
            )
        }
        None => conn.execute(
            "INSERT INTO teachers (id, full_name, email, cin, phone, level, subject,
                                   classes_count, tests_per_term, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                gen_id(),
                input.full_name,
                email,
                input.cin,
                input.phone,
                input.level,
                input.subject,
                input.classes_count,
                input.tests_per_term,
                ts
            ],
        ),
    };

    match result {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::Conflict(
                "a teacher with this CIN already exists".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    }

    get_teacher_by_email(conn, &email)?
        .ok_or_else(|| AppError::Internal("teacher upsert produced no row".into()))
}

/// Apply an activation-time profile update. If the workload fields changed,
/// the upload ceiling is recomputed and reapplied to every license the
/// teacher owns, inside the same transaction, with a `license.updated` event
/// per affected license.
pub fn apply_profile_update(
    conn: &mut Connection,
    key: &str,
    update: &TeacherProfileUpdate,
) -> Result<Option<i64>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(license) = get_license_by_key(&tx, key)? else {
        log_unknown_key(&tx, key)?;
        tx.commit()?;
        return Err(AppError::NotFound("license not found".into()));
    };

    let teacher = get_teacher(&tx, &license.teacher_id)?
        .ok_or_else(|| AppError::NotFound("teacher not found".into()))?;

    let workload_changed = update.changes_workload(&teacher);

    let builder = UpdateBuilder::new("teachers", &teacher.id)
        .set_opt("cin", update.cin.clone())
        .set_opt("phone", update.phone.clone())
        .set_opt("level", update.level.clone())
        .set_opt("subject", update.subject.clone())
        .set_opt("classes_count", update.classes_count)
        .set_opt("tests_per_term", update.tests_per_term);
    if builder.is_empty() {
        tx.commit()?;
        return Ok(None);
    }
    builder.execute(&tx)?;

    if !workload_changed {
        tx.commit()?;
        return Ok(None);
    }

    let tests = update.tests_per_term.or(teacher.tests_per_term);
    let classes = update.classes_count.or(teacher.classes_count);
    let new_limit = calculate_upload_limit(tests, classes);

    // The workload belongs to the teacher, so every license they own gets
    // the recomputed ceiling, not just the one being activated.
    let licenses: Vec<License> = query_all(
        &tx,
        &format!("SELECT {} FROM licenses WHERE teacher_id = ?1", LICENSE_COLS),
        &[&teacher.id],
    )?;
    for license in &licenses {
        if license.upload_limit == new_limit {
            continue;
        }
        tx.execute(
            "UPDATE licenses SET upload_limit = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_limit, now(), license.id],
        )?;
        insert_event(
            &tx,
            Some(&license.id),
            Some(&teacher.id),
            EventType::LicenseUpdated,
            "upload limit recomputed from updated workload profile",
            Some(&serde_json::json!({
                "previousLimit": license.upload_limit,
                "newLimit": new_limit,
            })),
        )?;
    }

    tx.commit()?;
    Ok(Some(new_limit))
}

/// Recompute the upload ceiling for every license a teacher owns.
/// Admin-triggered; explicit workload values override (and replace) the
/// stored ones, absent values fall back to what is on file.
pub fn recompute_teacher_limits(
    conn: &mut Connection,
    teacher_id: &str,
    tests_per_term: Option<i64>,
    classes_count: Option<i64>,
) -> Result<i64> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let teacher = get_teacher(&tx, teacher_id)?
        .ok_or_else(|| AppError::NotFound("teacher not found".into()))?;

    UpdateBuilder::new("teachers", &teacher.id)
        .set_opt("tests_per_term", tests_per_term)
        .set_opt("classes_count", classes_count)
        .execute(&tx)?;

    let tests = tests_per_term.or(teacher.tests_per_term);
    let classes = classes_count.or(teacher.classes_count);
    let new_limit = calculate_upload_limit(tests, classes);

    let licenses: Vec<License> = query_all(
        &tx,
        &format!("SELECT {} FROM licenses WHERE teacher_id = ?1", LICENSE_COLS),
        &[&teacher_id],
    )?;
    for license in &licenses {
        if license.upload_limit == new_limit {
            continue;
        }
        tx.execute(
            "UPDATE licenses SET upload_limit = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_limit, now(), license.id],
        )?;
        insert_event(
            &tx,
            Some(&license.id),
            Some(&teacher.id),
            EventType::LicenseUpdated,
            "upload limit recomputed by admin",
            Some(&serde_json::json!({
                "previousLimit": license.upload_limit,
                "newLimit": new_limit,
            })),
        )?;
    }

    tx.commit()?;
    Ok(new_limit)
}

// ============ Licenses ============

pub fn get_license_by_key(conn: &Connection, key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE key = ?1", LICENSE_COLS),
        &[&key],
    )
}

pub fn get_license_with_teacher_by_key(
    conn: &Connection,
    key: &str,
) -> Result<Option<LicenseWithTeacher>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses l JOIN teachers t ON t.id = l.teacher_id WHERE l.key = ?1",
            LICENSE_WITH_TEACHER_COLS
        ),
        &[&key],
    )
}

/// List licenses with owner identity, newest first. `q` matches against the
/// key and the owner's name/email.
pub fn list_licenses(
    conn: &Connection,
    q: Option<&str>,
    status: Option<LicenseStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<LicenseWithTeacher>> {
    let mut sql = format!(
        "SELECT {} FROM licenses l JOIN teachers t ON t.id = l.teacher_id WHERE 1=1",
        LICENSE_WITH_TEACHER_COLS
    );
    let mut values: Vec<Value> = Vec::new();
    if let Some(q) = q {
        sql.push_str(" AND (l.key LIKE ?1 OR t.email LIKE ?1 OR t.full_name LIKE ?1)");
        values.push(format!("%{}%", q).into());
    }
    if let Some(status) = status {
        sql.push_str(" AND l.status = ?");
        values.push(status.as_ref().to_string().into());
    }
    sql.push_str(" ORDER BY l.created_at DESC, l.id DESC LIMIT ? OFFSET ?");
    values.push(limit.clamp(1, 200).into());
    values.push(offset.max(0).into());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(values),
            LicenseWithTeacher::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Issue a new license: upsert the owning teacher by email, derive the
/// upload ceiling from the workload profile, and mint a fresh key. All in
/// one transaction with a `license.created` event.
pub fn issue_license(conn: &mut Connection, input: &IssueLicense) -> Result<LicenseWithTeacher> {
    if !(1..=2).contains(&input.allowed_devices) {
        return Err(AppError::BadRequest(
            "allowedDevices must be 1 or 2".into(),
        ));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let teacher = upsert_teacher(&tx, input)?;

    let upload_limit = calculate_upload_limit(input.tests_per_term, input.classes_count);
    let ts = now();
    let valid_until = Utc::now()
        .checked_add_months(Months::new(input.months_valid))
        .map(|d| d.timestamp())
        .unwrap_or(ts + input.months_valid as i64 * 30 * 86_400);

    // Collision on a fresh key is astronomically unlikely; retry a few times
    // rather than failing the issuance outright.
    let mut key = generate_license_key();
    for _ in 0..4 {
        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM licenses WHERE key = ?1)",
            params![key],
            |row| row.get(0),
        )?;
        if !taken {
            break;
        }
        key = generate_license_key();
    }

    let id = gen_id();
    tx.execute(
        "INSERT INTO licenses (id, teacher_id, key, allowed_devices, valid_until, status,
                               upload_limit, upload_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, 0, ?7, ?7)",
        params![
            id,
            teacher.id,
            key,
            input.allowed_devices,
            valid_until,
            upload_limit,
            ts
        ],
    )?;
    insert_event(
        &tx,
        Some(&id),
        Some(&teacher.id),
        EventType::LicenseCreated,
        "license issued",
        Some(&serde_json::json!({
            "allowedDevices": input.allowed_devices,
            "uploadLimit": upload_limit,
        })),
    )?;

    let license: License = query_one(
        &tx,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )?
    .ok_or_else(|| AppError::Internal("license insert produced no row".into()))?;

    tx.commit()?;
    Ok(LicenseWithTeacher {
        license,
        teacher_name: teacher.full_name,
        teacher_email: teacher.email,
    })
}

/// Fields an admin may patch on an existing license.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicensePatch {
    pub allowed_devices: Option<i64>,
    /// New expiry instant (unix seconds).
    pub valid_until: Option<i64>,
    /// Manual ceiling override; bypasses the workload formula.
    pub upload_limit: Option<i64>,
}

pub fn update_license(conn: &mut Connection, key: &str, patch: &LicensePatch) -> Result<License> {
    if let Some(devices) = patch.allowed_devices {
        if !(1..=2).contains(&devices) {
            return Err(AppError::BadRequest(
                "allowedDevices must be 1 or 2".into(),
            ));
        }
    }
    if patch.upload_limit.is_some_and(|l| l < 1) {
        return Err(AppError::BadRequest("uploadLimit must be positive".into()));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let license = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::NotFound("license not found".into()))?;

    let builder = UpdateBuilder::new("licenses", &license.id)
        .set_opt("allowed_devices", patch.allowed_devices)
        .set_opt("valid_until", patch.valid_until)
        .set_opt("upload_limit", patch.upload_limit);
    if builder.is_empty() {
        tx.commit()?;
        return Ok(license);
    }
    builder.execute(&tx)?;

    insert_event(
        &tx,
        Some(&license.id),
        Some(&license.teacher_id),
        EventType::LicenseUpdated,
        "license updated by admin",
        Some(&serde_json::json!({
            "allowedDevices": patch.allowed_devices,
            "validUntil": patch.valid_until,
            "uploadLimit": patch.upload_limit,
        })),
    )?;

    let updated = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::Internal("license vanished mid-update".into()))?;
    tx.commit()?;
    Ok(updated)
}

/// Flip a license between active and suspended. Expired is never set through
/// this path, and an expired license only goes back to active once its
/// `valid_until` has been pushed into the future. Re-activation does NOT
/// reset the upload counter, so a quota-suspended license re-suspends on its
/// next upload unless the ceiling is also raised.
pub fn admin_set_status(
    conn: &mut Connection,
    key: &str,
    new_status: LicenseStatus,
    reason: Option<&str>,
) -> Result<License> {
    if new_status == LicenseStatus::Expired {
        return Err(AppError::BadRequest(
            "expired is not an assignable status".into(),
        ));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let license = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::NotFound("license not found".into()))?;

    if license.status == new_status {
        tx.commit()?;
        return Ok(license);
    }
    if license.status == LicenseStatus::Expired
        && (new_status != LicenseStatus::Active || license.valid_until <= now())
    {
        return Err(AppError::Conflict(
            "an expired license can only be re-activated after its expiry is extended".into(),
        ));
    }

    tx.execute(
        "UPDATE licenses SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![new_status.as_ref(), now(), license.id],
    )?;

    let (event_type, message) = match new_status {
        LicenseStatus::Suspended => (EventType::LicenseSuspended, "license suspended by admin"),
        _ => (EventType::LicenseReactivated, "license re-activated by admin"),
    };
    insert_event(
        &tx,
        Some(&license.id),
        Some(&license.teacher_id),
        event_type,
        message,
        reason.map(|r| serde_json::json!({ "reason": r })).as_ref(),
    )?;

    let updated = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::Internal("license vanished mid-update".into()))?;
    tx.commit()?;
    Ok(updated)
}

/// Delete a license. Activations and events go with it via FK cascade; the
/// teacher row stays.
pub fn delete_license(conn: &Connection, key: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM licenses WHERE key = ?1", params![key])?;
    if affected == 0 {
        return Err(AppError::NotFound("license not found".into()));
    }
    Ok(())
}

/// Gate every enforcement path on license state, promoting `active` to
/// `expired` lazily the first time `valid_until` is observed in the past.
/// Runs inside the caller's transaction.
fn ensure_active(tx: &Connection, license: &License) -> Result<()> {
    match license.status {
        LicenseStatus::Suspended => Err(AppError::LicenseSuspended),
        LicenseStatus::Expired => Err(AppError::LicenseExpired),
        LicenseStatus::Active => {
            if now() >= license.valid_until {
                tx.execute(
                    "UPDATE licenses SET status = 'expired', updated_at = ?1 WHERE id = ?2",
                    params![now(), license.id],
                )?;
                insert_event(
                    tx,
                    Some(&license.id),
                    Some(&license.teacher_id),
                    EventType::LicenseExpired,
                    "license expired",
                    None,
                )?;
                return Err(AppError::LicenseExpired);
            }
            Ok(())
        }
    }
}

/// Unknown keys are logged too: a burst of bad-key attempts is the first
/// sign of a guessing client or a corrupted install.
fn log_unknown_key(tx: &Connection, key: &str) -> Result<()> {
    insert_event(
        tx,
        None,
        None,
        EventType::ValidationFailed,
        "validation failed: unknown license key",
        Some(&serde_json::json!({ "attemptedKey": key })),
    )
}

fn suspend_license(tx: &Connection, license: &License, message: &str) -> Result<()> {
    tx.execute(
        "UPDATE licenses SET status = 'suspended', updated_at = ?1 WHERE id = ?2",
        params![now(), license.id],
    )?;
    insert_event(
        tx,
        Some(&license.id),
        Some(&license.teacher_id),
        EventType::LicenseSuspended,
        message,
        None,
    )?;
    Ok(())
}

// ============ Activations ============

pub fn get_activation(
    conn: &Connection,
    license_id: &str,
    device_id: &str,
) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_id = ?1 AND device_id = ?2",
            ACTIVATION_COLS
        ),
        &[&license_id, &device_id],
    )
}

pub fn list_activations(conn: &Connection, license_id: &str) -> Result<Vec<Activation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_id = ?1 ORDER BY activated_at DESC",
            ACTIVATION_COLS
        ),
        &[&license_id],
    )
}

pub fn count_activations(conn: &Connection, license_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM activations WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

fn touch_activation(tx: &Connection, activation: &Activation, ctx: &ClientContext) -> Result<i64> {
    let ts = now();
    tx.execute(
        "UPDATE activations SET last_seen_at = ?1, last_ip = COALESCE(?2, last_ip) WHERE id = ?3",
        params![ts, ctx.ip, activation.id],
    )?;
    Ok(ts)
}

/// Claim a device slot for `device_id`, atomically.
///
/// A known fingerprint refreshes its liveness fields and consumes nothing. A
/// new fingerprint consumes a slot if one is free; if none is, the license is
/// suspended on the spot (an over-limit claim is treated as key sharing) and
/// the rejection is logged, all before the error surfaces.
pub fn claim_device_atomic(
    conn: &mut Connection,
    key: &str,
    device_id: &str,
    ctx: &ClientContext,
) -> Result<(License, DeviceClaim)> {
    // IMMEDIATE takes the write lock up front, preventing TOCTOU races on the
    // slot count.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(license) = get_license_by_key(&tx, key)? else {
        log_unknown_key(&tx, key)?;
        tx.commit()?;
        return Err(AppError::NotFound("license not found".into()));
    };

    if let Err(e) = ensure_active(&tx, &license) {
        // Lazy expiry must persist even though the claim fails
        tx.commit()?;
        return Err(e);
    }

    if let Some(activation) = get_activation(&tx, &license.id, device_id)? {
        let ts = touch_activation(&tx, &activation, ctx)?;
        tx.commit()?;
        return Ok((
            license,
            DeviceClaim::Existing(Activation {
                last_seen_at: ts,
                last_ip: ctx.ip.clone().or(activation.last_ip.clone()),
                ..activation
            }),
        ));
    }

    let used = count_activations(&tx, &license.id)?;
    if used >= license.allowed_devices {
        insert_event(
            &tx,
            Some(&license.id),
            Some(&license.teacher_id),
            EventType::ActivationRejected,
            "activation rejected: device limit exceeded",
            Some(&serde_json::json!({
                "deviceId": device_id,
                "devicesUsed": used,
                "maxDevices": license.allowed_devices,
            })),
        )?;
        suspend_license(&tx, &license, "license suspended: device limit violation")?;
        tx.commit()?;
        return Err(AppError::DeviceLimitExceeded {
            devices_used: used,
            max_devices: license.allowed_devices,
        });
    }

    let ts = now();
    let activation = Activation {
        id: gen_id(),
        license_id: license.id.clone(),
        device_id: device_id.to_string(),
        user_agent: ctx.user_agent.clone(),
        ip: ctx.ip.clone(),
        metadata: ctx.metadata.clone(),
        activated_at: ts,
        last_seen_at: ts,
        last_ip: ctx.ip.clone(),
    };
    tx.execute(
        "INSERT INTO activations (id, license_id, device_id, user_agent, ip, metadata,
                                  activated_at, last_seen_at, last_ip)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            activation.id,
            activation.license_id,
            activation.device_id,
            activation.user_agent,
            activation.ip,
            activation.metadata.as_ref().map(|m| m.to_string()),
            activation.activated_at,
            activation.last_seen_at,
            activation.last_ip
        ],
    )?;
    insert_event(
        &tx,
        Some(&license.id),
        Some(&license.teacher_id),
        EventType::ActivationCreated,
        "device activated",
        Some(&serde_json::json!({
            "deviceId": device_id,
            "devicesUsed": used + 1,
            "maxDevices": license.allowed_devices,
        })),
    )?;

    tx.commit()?;
    Ok((license, DeviceClaim::New(activation)))
}

/// Outcome of a successful validation check.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub license: License,
    pub activation: Activation,
    pub device_count: i64,
}

/// Validate an existing binding. Never creates one: an unknown fingerprint is
/// rejected with `device_not_activated` and must go through activation.
/// Successful validations are logged at most once per device per rolling day.
pub fn validate_device_atomic(
    conn: &mut Connection,
    key: &str,
    device_id: &str,
    ctx: &ClientContext,
) -> Result<ValidationOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(license) = get_license_by_key(&tx, key)? else {
        log_unknown_key(&tx, key)?;
        tx.commit()?;
        return Err(AppError::NotFound("license not found".into()));
    };

    if let Err(e) = ensure_active(&tx, &license) {
        insert_event(
            &tx,
            Some(&license.id),
            Some(&license.teacher_id),
            EventType::ValidationFailed,
            "validation failed",
            Some(&serde_json::json!({ "deviceId": device_id, "reason": e.tag() })),
        )?;
        tx.commit()?;
        return Err(e);
    }

    let Some(activation) = get_activation(&tx, &license.id, device_id)? else {
        insert_event(
            &tx,
            Some(&license.id),
            Some(&license.teacher_id),
            EventType::ValidationFailed,
            "validation failed: device not activated",
            Some(&serde_json::json!({ "deviceId": device_id, "reason": "device_not_activated" })),
        )?;
        tx.commit()?;
        return Err(AppError::DeviceNotActivated);
    };

    if activation.last_seen_at < now() - VALIDATION_DEDUPE_SECS {
        insert_event(
            &tx,
            Some(&license.id),
            Some(&license.teacher_id),
            EventType::ValidationOk,
            "device validated",
            Some(&serde_json::json!({ "deviceId": device_id })),
        )?;
    }

    let ts = touch_activation(&tx, &activation, ctx)?;
    let device_count = count_activations(&tx, &license.id)?;
    tx.commit()?;

    Ok(ValidationOutcome {
        license,
        activation: Activation {
            last_seen_at: ts,
            last_ip: ctx.ip.clone().or(activation.last_ip.clone()),
            ..activation
        },
        device_count,
    })
}

/// Release a device slot. Works on suspended and expired licenses too, so a
/// teacher can free a slot before asking for re-activation.
pub fn remove_device_atomic(conn: &mut Connection, key: &str, device_id: &str) -> Result<i64> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::NotFound("license not found".into()))?;

    let affected = tx.execute(
        "DELETE FROM activations WHERE license_id = ?1 AND device_id = ?2",
        params![license.id, device_id],
    )?;
    if affected == 0 {
        return Err(AppError::DeviceNotActivated);
    }
    insert_event(
        &tx,
        Some(&license.id),
        Some(&license.teacher_id),
        EventType::ActivationRemoved,
        "device deactivated",
        Some(&serde_json::json!({ "deviceId": device_id })),
    )?;

    let remaining = count_activations(&tx, &license.id)?;
    tx.commit()?;
    Ok(remaining)
}

// ============ Usage metering ============

/// Why an upload would be refused right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDenial {
    Suspended,
    Expired,
    QuotaExhausted,
}

/// Read-only usage probe result.
#[derive(Debug)]
pub struct UploadGate {
    pub license: License,
    pub denial: Option<UploadDenial>,
}

/// Emit the one-time 90% usage warning if this license has crossed the
/// threshold and has not been warned before. Returns true when it fired.
fn maybe_warn_usage(tx: &Connection, license: &License, upload_count: i64) -> Result<bool> {
    if upload_count * 100 < license.upload_limit * USAGE_WARNING_THRESHOLD {
        return Ok(false);
    }
    let already_warned: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM events WHERE license_id = ?1 AND type = ?2)",
        params![license.id, EventType::UsageWarning.as_ref()],
        |row| row.get(0),
    )?;
    if already_warned {
        return Ok(false);
    }
    insert_event(
        tx,
        Some(&license.id),
        Some(&license.teacher_id),
        EventType::UsageWarning,
        "usage above 90% of upload limit",
        Some(&serde_json::json!({
            "uploadCount": upload_count,
            "uploadLimit": license.upload_limit,
        })),
    )?;
    Ok(true)
}

/// Probe whether an upload would be accepted, without consuming quota.
/// Lazy expiry still applies: an overdue active license flips to expired.
/// Crossing 90% usage is observed here too and logged once per license.
pub fn check_upload_allowed(conn: &mut Connection, key: &str) -> Result<UploadGate> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::NotFound("license not found".into()))?;

    let denial = match ensure_active(&tx, &license) {
        Ok(()) if license.upload_count >= license.upload_limit => {
            Some(UploadDenial::QuotaExhausted)
        }
        Ok(()) => {
            maybe_warn_usage(&tx, &license, license.upload_count)?;
            None
        }
        Err(AppError::LicenseSuspended) => Some(UploadDenial::Suspended),
        Err(AppError::LicenseExpired) => Some(UploadDenial::Expired),
        Err(e) => return Err(e),
    };

    // Refetch so a lazy expiry is reflected in the returned status
    let license = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::Internal("license vanished mid-check".into()))?;
    tx.commit()?;
    Ok(UploadGate { license, denial })
}

/// Outcome of a recorded upload.
#[derive(Debug)]
pub struct UploadOutcome {
    /// License state after the increment.
    pub license: License,
    /// True when this upload consumed the last unit and the license was
    /// suspended as a result.
    pub suspended: bool,
    /// True when the one-time 90% usage warning fired on this upload.
    pub warning: bool,
}

/// Record one upload against the license's quota, atomically.
///
/// The upload that consumes the last unit still succeeds, but it logs
/// `license.usage_limit_reached` instead of `upload.success` and the license
/// is suspended in the same transaction so the next attempt fails.
pub fn record_upload_atomic(
    conn: &mut Connection,
    key: &str,
    metadata: Option<&serde_json::Value>,
) -> Result<UploadOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let license = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::NotFound("license not found".into()))?;

    if let Err(e) = ensure_active(&tx, &license) {
        tx.commit()?;
        return Err(e);
    }

    if license.upload_count >= license.upload_limit {
        return Err(AppError::QuotaExhausted {
            upload_count: license.upload_count,
            upload_limit: license.upload_limit,
        });
    }

    let new_count = license.upload_count + 1;
    tx.execute(
        "UPDATE licenses SET upload_count = ?1, updated_at = ?2 WHERE id = ?3",
        params![new_count, now(), license.id],
    )?;

    let mut suspended = false;
    let mut warning = false;

    if new_count >= license.upload_limit {
        insert_event(
            &tx,
            Some(&license.id),
            Some(&license.teacher_id),
            EventType::UsageLimitReached,
            "upload limit reached",
            Some(&serde_json::json!({
                "uploadCount": new_count,
                "uploadLimit": license.upload_limit,
            })),
        )?;
        suspend_license(&tx, &license, "license suspended: upload limit reached")?;
        suspended = true;
    } else {
        insert_event(
            &tx,
            Some(&license.id),
            Some(&license.teacher_id),
            EventType::UploadSuccess,
            "upload recorded",
            metadata,
        )?;
        warning = maybe_warn_usage(&tx, &license, new_count)?;
    }

    let updated = get_license_by_key(&tx, key)?
        .ok_or_else(|| AppError::Internal("license vanished mid-upload".into()))?;
    tx.commit()?;

    Ok(UploadOutcome {
        license: updated,
        suspended,
        warning,
    })
}
