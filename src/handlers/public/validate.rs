use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::Json;
use crate::models::ClientContext;
use crate::util::extract_request_info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub key: String,
    pub device_id: String,
}

/// POST /validate - heartbeat for an already-activated device.
///
/// Strict: an unknown fingerprint is rejected with `device_not_activated`
/// and must go through /activate. Validation never consumes a slot and never
/// suspends anything.
pub async fn validate_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<Value>> {
    let (ip, user_agent) = extract_request_info(&headers);
    let ctx = ClientContext {
        user_agent,
        ip,
        metadata: None,
    };

    let mut conn = state.db.get()?;
    let outcome = queries::validate_device_atomic(&mut conn, &req.key, &req.device_id, &ctx)?;

    let remaining_days = ((outcome.license.valid_until - Utc::now().timestamp()) / 86_400).max(0);

    Ok(Json(json!({
        "valid": true,
        "validUntil": outcome.license.valid_until,
        "remainingDays": remaining_days,
        "deviceCount": outcome.device_count,
        "maxDevices": outcome.license.allowed_devices,
    })))
}
