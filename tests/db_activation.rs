//! Device claim, validation, and slot-release tests at the query layer.

mod common;
use common::*;

use markfiller::error::AppError;

#[test]
fn test_first_claim_consumes_a_slot() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "claim@example.com", 2);
    let key = &issued.license.key;

    let mut conn = state.db.get().unwrap();
    let (_, claim) =
        queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default()).unwrap();
    assert!(claim.is_new_device());
    assert_eq!(queries::count_activations(&conn, &issued.license.id).unwrap(), 1);
    assert_eq!(
        events_of_type(&state, &issued.license.id, "activation.created").len(),
        1
    );
}

#[test]
fn test_repeat_claim_is_idempotent() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "idem@example.com", 1);
    let key = &issued.license.key;

    let mut conn = state.db.get().unwrap();
    queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default()).unwrap();
    let (_, claim) = queries::claim_device_atomic(
        &mut conn,
        key,
        "dev-1",
        &ClientContext {
            ip: Some("10.0.0.9".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    assert!(!claim.is_new_device());
    assert_eq!(claim.activation().last_ip.as_deref(), Some("10.0.0.9"));
    assert_eq!(queries::count_activations(&conn, &issued.license.id).unwrap(), 1);
    // No second activation.created event
    assert_eq!(
        events_of_type(&state, &issued.license.id, "activation.created").len(),
        1
    );
}

#[test]
fn test_over_limit_claim_suspends_license() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "limit@example.com", 1);
    let key = &issued.license.key;

    let mut conn = state.db.get().unwrap();
    queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default()).unwrap();
    let err = queries::claim_device_atomic(&mut conn, key, "dev-2", &ClientContext::default())
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::DeviceLimitExceeded {
            devices_used: 1,
            max_devices: 1
        }
    ));

    // Punitive: the violation itself suspends the license
    let license = queries::get_license_by_key(&conn, key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Suspended);
    assert_eq!(
        events_of_type(&state, &issued.license.id, "activation.rejected").len(),
        1
    );
    assert_eq!(
        events_of_type(&state, &issued.license.id, "license.suspended").len(),
        1
    );

    // Even the already-bound device is now refused
    let err = queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default())
        .unwrap_err();
    assert!(matches!(err, AppError::LicenseSuspended));
}

#[test]
fn test_validate_requires_existing_binding() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "strict@example.com", 2);
    let key = &issued.license.key;

    let mut conn = state.db.get().unwrap();
    let err = queries::validate_device_atomic(&mut conn, key, "ghost", &ClientContext::default())
        .unwrap_err();
    assert!(matches!(err, AppError::DeviceNotActivated));

    // Unknown device is not a capacity violation: no suspension, no binding
    let license = queries::get_license_by_key(&conn, key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Active);
    assert_eq!(queries::count_activations(&conn, &issued.license.id).unwrap(), 0);
    assert_eq!(
        events_of_type(&state, &issued.license.id, "validation.failed").len(),
        1
    );
}

#[test]
fn test_validate_known_device_and_daily_dedupe() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "beat@example.com", 2);
    let key = &issued.license.key;

    let mut conn = state.db.get().unwrap();
    queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default()).unwrap();

    let outcome =
        queries::validate_device_atomic(&mut conn, key, "dev-1", &ClientContext::default())
            .unwrap();
    assert_eq!(outcome.device_count, 1);
    assert_eq!(outcome.license.allowed_devices, 2);

    // The activation was seen moments ago, so no validation.ok yet; a second
    // validate inside the same day stays quiet too
    queries::validate_device_atomic(&mut conn, key, "dev-1", &ClientContext::default()).unwrap();
    assert!(events_of_type(&state, &issued.license.id, "validation.ok").is_empty());

    // Age the binding past the dedupe window
    conn.execute(
        "UPDATE activations SET last_seen_at = ?1 WHERE license_id = ?2",
        rusqlite::params![now() - 2 * 86_400, issued.license.id],
    )
    .unwrap();
    queries::validate_device_atomic(&mut conn, key, "dev-1", &ClientContext::default()).unwrap();
    assert_eq!(
        events_of_type(&state, &issued.license.id, "validation.ok").len(),
        1
    );
}

#[test]
fn test_unknown_key_is_logged() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();
    let err = queries::claim_device_atomic(
        &mut conn,
        "MF-NOSUCH-LICENSE",
        "dev-1",
        &ClientContext::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let events = queries::query_events(
        &conn,
        &EventQuery {
            event_type: Some("validation.failed".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].license_id.is_none());
}

#[test]
fn test_deactivate_frees_a_slot() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "free@example.com", 1);
    let key = &issued.license.key;

    let mut conn = state.db.get().unwrap();
    queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default()).unwrap();
    let remaining = queries::remove_device_atomic(&mut conn, key, "dev-1").unwrap();
    assert_eq!(remaining, 0);
    assert_eq!(
        events_of_type(&state, &issued.license.id, "activation.removed").len(),
        1
    );

    // The freed slot is claimable again
    let (_, claim) =
        queries::claim_device_atomic(&mut conn, key, "dev-2", &ClientContext::default()).unwrap();
    assert!(claim.is_new_device());

    // Removing a device that is not bound is a typed error
    assert!(matches!(
        queries::remove_device_atomic(&mut conn, key, "ghost"),
        Err(AppError::DeviceNotActivated)
    ));
}
