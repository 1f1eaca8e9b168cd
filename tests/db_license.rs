//! License issuance and lifecycle tests at the query layer.

mod common;
use common::*;

use markfiller::error::AppError;

#[test]
fn test_issue_license_derives_limit_from_workload() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "a@example.com", 1);

    // 3 tests * 2 * 4 classes + 10
    assert_eq!(issued.license.upload_limit, 34);
    assert_eq!(issued.license.upload_count, 0);
    assert_eq!(issued.license.status, LicenseStatus::Active);
    assert!(issued.license.key.starts_with("MF-"));
    assert_eq!(issued.license.key.len(), 16);

    let created = events_of_type(&state, &issued.license.id, "license.created");
    assert_eq!(created.len(), 1);
}

#[test]
fn test_issue_license_floor_without_workload() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();
    let mut input = test_issue_input("floor@example.com");
    input.classes_count = None;
    input.tests_per_term = None;
    let issued = queries::issue_license(&mut conn, &input).unwrap();
    assert_eq!(issued.license.upload_limit, 10);
}

#[test]
fn test_issue_reuses_teacher_by_email() {
    let state = create_test_app_state();
    let first = issue_test_license(&state, "same@example.com", 1);
    let second = issue_test_license(&state, "SAME@example.com", 1);

    assert_eq!(first.license.teacher_id, second.license.teacher_id);
    assert_ne!(first.license.key, second.license.key);
}

#[test]
fn test_issue_rejects_duplicate_cin() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();

    let mut a = test_issue_input("a@dup.com");
    a.cin = "SAME-CIN".to_string();
    queries::issue_license(&mut conn, &a).unwrap();

    let mut b = test_issue_input("b@dup.com");
    b.cin = "SAME-CIN".to_string();
    let err = queries::issue_license(&mut conn, &b).unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[test]
fn test_issue_rejects_bad_device_capacity() {
    let state = create_test_app_state();
    let mut conn = state.db.get().unwrap();
    let mut input = test_issue_input("cap@example.com");
    input.allowed_devices = 3;
    assert!(matches!(
        queries::issue_license(&mut conn, &input),
        Err(AppError::BadRequest(_))
    ));
}

#[test]
fn test_suspend_and_reactivate_keeps_upload_count() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "flip@example.com", 1);
    let key = &issued.license.key;
    set_usage(&state, key, 20, 34);

    let mut conn = state.db.get().unwrap();
    let suspended =
        queries::admin_set_status(&mut conn, key, LicenseStatus::Suspended, Some("abuse")).unwrap();
    assert_eq!(suspended.status, LicenseStatus::Suspended);

    let reactivated =
        queries::admin_set_status(&mut conn, key, LicenseStatus::Active, None).unwrap();
    assert_eq!(reactivated.status, LicenseStatus::Active);
    assert_eq!(reactivated.upload_count, 20);

    assert_eq!(
        events_of_type(&state, &issued.license.id, "license.suspended").len(),
        1
    );
    assert_eq!(
        events_of_type(&state, &issued.license.id, "license.reactivated").len(),
        1
    );
}

#[test]
fn test_expired_is_not_assignable_and_is_terminal() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "exp@example.com", 1);
    let key = &issued.license.key;
    let mut conn = state.db.get().unwrap();

    assert!(matches!(
        queries::admin_set_status(&mut conn, key, LicenseStatus::Expired, None),
        Err(AppError::BadRequest(_))
    ));

    // Promote to expired via the lazy path, then try to flip it back
    force_expire(&state, key);
    let _ = queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default());
    assert!(matches!(
        queries::admin_set_status(&mut conn, key, LicenseStatus::Active, None),
        Err(AppError::Conflict(_))
    ));
}

#[test]
fn test_lazy_expiry_promotes_and_logs_once() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "lazy@example.com", 1);
    let key = &issued.license.key;
    force_expire(&state, key);

    let mut conn = state.db.get().unwrap();
    let err = queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default())
        .unwrap_err();
    assert!(matches!(err, AppError::LicenseExpired));

    let license = queries::get_license_by_key(&conn, key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Expired);

    // Second observation short-circuits on status, no second event
    let err = queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default())
        .unwrap_err();
    assert!(matches!(err, AppError::LicenseExpired));
    assert_eq!(
        events_of_type(&state, &issued.license.id, "license.expired").len(),
        1
    );
}

#[test]
fn test_delete_license_cascades() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "del@example.com", 1);
    let key = issued.license.key.clone();

    let mut conn = state.db.get().unwrap();
    queries::claim_device_atomic(&mut conn, &key, "dev-1", &ClientContext::default()).unwrap();
    queries::delete_license(&conn, &key).unwrap();

    assert!(queries::get_license_by_key(&conn, &key).unwrap().is_none());
    assert!(queries::list_activations(&conn, &issued.license.id)
        .unwrap()
        .is_empty());
    assert!(events_of_type(&state, &issued.license.id, "license.created").is_empty());

    // Teacher survives the cascade
    assert!(queries::get_teacher(&conn, &issued.license.teacher_id)
        .unwrap()
        .is_some());
}

#[test]
fn test_update_license_capacity_and_limits() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "patch@example.com", 1);
    let key = &issued.license.key;

    let mut conn = state.db.get().unwrap();
    let patch = queries::LicensePatch {
        allowed_devices: Some(2),
        valid_until: Some(now() + 86_400 * 30),
        upload_limit: Some(100),
    };
    let updated = queries::update_license(&mut conn, key, &patch).unwrap();
    assert_eq!(updated.allowed_devices, 2);
    assert_eq!(updated.upload_limit, 100);
    assert_eq!(
        events_of_type(&state, &issued.license.id, "license.updated").len(),
        1
    );
}

#[test]
fn test_profile_update_fans_out_to_sibling_licenses() {
    let state = create_test_app_state();
    let first = issue_test_license(&state, "fanout@example.com", 1);
    let second = issue_test_license(&state, "fanout@example.com", 1);
    assert_eq!(second.license.upload_limit, 34);

    let mut conn = state.db.get().unwrap();
    let update = TeacherProfileUpdate {
        tests_per_term: Some(6),
        classes_count: Some(8),
        ..Default::default()
    };
    let new_limit = queries::apply_profile_update(&mut conn, &first.license.key, &update)
        .unwrap()
        .unwrap();
    assert_eq!(new_limit, 106);

    // Both licenses carry the recomputed ceiling, each with its own event
    for issued in [&first, &second] {
        let license = queries::get_license_by_key(&conn, &issued.license.key)
            .unwrap()
            .unwrap();
        assert_eq!(license.upload_limit, 106);
        assert_eq!(
            events_of_type(&state, &issued.license.id, "license.updated").len(),
            1
        );
    }
}

#[test]
fn test_expired_license_revives_after_expiry_extension() {
    let state = create_test_app_state();
    let issued = issue_test_license(&state, "revive@example.com", 1);
    let key = &issued.license.key;
    let mut conn = state.db.get().unwrap();

    force_expire(&state, key);
    let _ = queries::claim_device_atomic(&mut conn, key, "dev-1", &ClientContext::default());

    // Refused while valid_until is still in the past
    assert!(matches!(
        queries::admin_set_status(&mut conn, key, LicenseStatus::Active, None),
        Err(AppError::Conflict(_))
    ));

    let patch = queries::LicensePatch {
        allowed_devices: None,
        valid_until: Some(now() + 86_400 * 30),
        upload_limit: None,
    };
    queries::update_license(&mut conn, key, &patch).unwrap();

    let revived = queries::admin_set_status(&mut conn, key, LicenseStatus::Active, None).unwrap();
    assert_eq!(revived.status, LicenseStatus::Active);
    assert_eq!(
        events_of_type(&state, &issued.license.id, "license.reactivated").len(),
        1
    );
}
