//! Test utilities and fixtures for MarkFiller integration tests

#![allow(dead_code)]

use axum::Router;
use rusqlite::params;

pub use markfiller::db::{create_pool, init_db, queries, AppState};
pub use markfiller::handlers;
pub use markfiller::jwt::AdminKey;
pub use markfiller::models::*;

/// Create an AppState backed by a throwaway database file, so every pooled
/// connection sees the same data (a plain in-memory database would give each
/// connection its own).
pub fn create_test_app_state() -> AppState {
    let path = std::env::temp_dir().join(format!("markfiller-test-{}.db", uuid::Uuid::new_v4()));
    let pool = create_pool(path.to_str().unwrap()).expect("Failed to create test pool");
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }
    AppState {
        db: pool,
        admin_key: AdminKey::from_secret("unit-test-secret"),
    }
}

/// Router with all public endpoints, without rate limiting.
pub fn public_app(state: AppState) -> Router {
    handlers::public::router(None).with_state(state)
}

/// Router with all admin endpoints (auth middleware included).
pub fn admin_app(state: AppState) -> Router {
    handlers::admin::router(state.clone()).with_state(state)
}

/// Mint a bearer token accepted by the admin routes.
pub fn admin_token(state: &AppState) -> String {
    state.admin_key.sign("test@admin", "admin", 1).unwrap()
}

/// Issuance input with the standard test workload (3 tests x 4 classes
/// -> upload limit 34).
pub fn test_issue_input(email: &str) -> IssueLicense {
    IssueLicense {
        full_name: "Test Teacher".to_string(),
        email: email.to_string(),
        cin: format!("CIN-{}", email),
        phone: None,
        level: Some("secondary".to_string()),
        subject: Some("math".to_string()),
        classes_count: Some(4),
        tests_per_term: Some(3),
        allowed_devices: 1,
        months_valid: 10,
    }
}

/// Issue a license owned by `email` with the given device capacity.
pub fn issue_test_license(state: &AppState, email: &str, allowed_devices: i64) -> LicenseWithTeacher {
    let mut conn = state.db.get().unwrap();
    let mut input = test_issue_input(email);
    input.allowed_devices = allowed_devices;
    queries::issue_license(&mut conn, &input).expect("Failed to issue test license")
}

/// Force a license's expiry into the past, bypassing the API.
pub fn force_expire(state: &AppState, key: &str) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE licenses SET valid_until = ?1 WHERE key = ?2",
        params![now() - 86_400, key],
    )
    .unwrap();
}

/// Set a license's upload counters directly, for quota-edge setups.
pub fn set_usage(state: &AppState, key: &str, upload_count: i64, upload_limit: i64) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE licenses SET upload_count = ?1, upload_limit = ?2 WHERE key = ?3",
        params![upload_count, upload_limit, key],
    )
    .unwrap();
}

/// Events of one type for a license, newest first.
pub fn events_of_type(state: &AppState, license_id: &str, event_type: &str) -> Vec<EventLog> {
    let conn = state.db.get().unwrap();
    queries::query_events(
        &conn,
        &EventQuery {
            license_id: Some(license_id.to_string()),
            event_type: Some(event_type.to_string()),
            limit: None,
            offset: None,
        },
    )
    .unwrap()
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
