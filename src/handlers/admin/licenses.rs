use axum::extract::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::queries::{self, LicensePatch};
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{EventQuery, IssueLicense, LicenseStatus};

/// POST /admin/licenses - issue a license.
///
/// Upserts the owning teacher by email, so a second license for a known
/// teacher reuses the same profile. Duplicate CIN across different teachers
/// is a 409.
pub async fn issue_license(
    State(state): State<AppState>,
    Json(req): Json<IssueLicense>,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let issued = queries::issue_license(&mut conn, &req)?;

    tracing::info!(key = %issued.license.key, email = %issued.teacher_email, "license issued");

    Ok(Json(json!({
        "key": issued.license.key,
        "validUntil": issued.license.valid_until,
        "uploadLimit": issued.license.upload_limit,
        "allowedDevices": issued.license.allowed_devices,
        "teacherName": issued.teacher_name,
        "teacherEmail": issued.teacher_email,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLicensesQuery {
    /// Substring match on key, owner name, or owner email.
    pub q: Option<String>,
    pub status: Option<LicenseStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /admin/licenses - list with owner identity.
pub async fn list_licenses(
    State(state): State<AppState>,
    Query(q): Query<ListLicensesQuery>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let licenses = queries::list_licenses(
        &conn,
        q.q.as_deref(),
        q.status,
        q.limit.unwrap_or(50),
        q.offset.unwrap_or(0),
    )?;
    Ok(Json(json!({ "licenses": licenses })))
}

/// GET /admin/licenses/{key} - full picture: license, owner, device slots,
/// recent events.
pub async fn get_license(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let license = queries::get_license_with_teacher_by_key(&conn, &key)?
        .ok_or_else(|| AppError::NotFound("license not found".into()))?;
    let activations = queries::list_activations(&conn, &license.license.id)?;
    let events = queries::query_events(
        &conn,
        &EventQuery {
            license_id: Some(license.license.id.clone()),
            ..Default::default()
        },
    )?;

    Ok(Json(json!({
        "license": license,
        "activations": activations,
        "events": events,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLicenseRequest {
    pub key: String,
    /// Target status; only `active` and `suspended` are assignable.
    pub status: Option<LicenseStatus>,
    pub reason: Option<String>,
    pub allowed_devices: Option<i64>,
    pub valid_until: Option<i64>,
    pub upload_limit: Option<i64>,
}

/// PATCH /admin/licenses - status flips and capacity edits.
///
/// Re-activation intentionally keeps `upload_count`: a quota-suspended
/// license will re-suspend on its next upload unless `uploadLimit` is raised
/// in the same call.
pub async fn update_license_status(
    State(state): State<AppState>,
    Json(req): Json<UpdateLicenseRequest>,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;

    let patch = LicensePatch {
        allowed_devices: req.allowed_devices,
        valid_until: req.valid_until,
        upload_limit: req.upload_limit,
    };
    let mut license = queries::update_license(&mut conn, &req.key, &patch)?;

    if let Some(status) = req.status {
        license = queries::admin_set_status(&mut conn, &req.key, status, req.reason.as_deref())?;
    }

    Ok(Json(json!({ "license": license })))
}

/// DELETE /admin/licenses/{key} - hard delete. Activations and events
/// cascade; the teacher profile stays.
pub async fn delete_license(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    queries::delete_license(&conn, &key)?;

    tracing::info!(key = %key, "license deleted");

    Ok(Json(json!({ "deleted": true })))
}
