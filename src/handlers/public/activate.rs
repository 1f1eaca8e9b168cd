use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::Json;
use crate::models::{ClientContext, TeacherProfileUpdate};
use crate::util::extract_request_info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub key: String,
    pub device_id: String,
    /// Open metadata bag from the add-in (platform, Excel version, ...).
    #[serde(default)]
    pub device_info: Option<Value>,
    /// Optional workload profile update; changing `testsPerTerm` or
    /// `classesCount` recomputes the upload limit.
    #[serde(default)]
    pub profile: Option<TeacherProfileUpdate>,
}

/// POST /activate - claim (or refresh) a device slot for a license key.
///
/// A rejected claim on a full license suspends it before this returns, so
/// the 403 the client sees is already final.
pub async fn activate_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ActivateRequest>,
) -> Result<Json<Value>> {
    let (ip, user_agent) = extract_request_info(&headers);
    let ctx = ClientContext {
        user_agent,
        ip,
        metadata: req.device_info.clone(),
    };

    let mut conn = state.db.get()?;

    // The profile lands first; a rejected claim must not discard it.
    if let Some(profile) = &req.profile {
        queries::apply_profile_update(&mut conn, &req.key, profile)?;
    }

    let (license, claim) = queries::claim_device_atomic(&mut conn, &req.key, &req.device_id, &ctx)?;

    tracing::info!(
        key = %req.key,
        new_device = claim.is_new_device(),
        "device activated"
    );

    Ok(Json(json!({
        "valid": true,
        "validUntil": license.valid_until,
        "uploadLimit": license.upload_limit,
        "uploadCount": license.upload_count,
        "remainingUploads": license.remaining_uploads(),
        "isNewDevice": claim.is_new_device(),
    })))
}
