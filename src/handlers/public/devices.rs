use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::Json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateRequest {
    pub key: String,
    pub device_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateResponse {
    pub success: bool,
    pub remaining_devices: i64,
}

/// POST /devices/deactivate - release a device slot.
///
/// Works regardless of license status so a teacher can free a slot on a
/// suspended license before asking for re-activation.
pub async fn deactivate_device(
    State(state): State<AppState>,
    Json(req): Json<DeactivateRequest>,
) -> Result<Json<DeactivateResponse>> {
    let mut conn = state.db.get()?;
    let remaining = queries::remove_device_atomic(&mut conn, &req.key, &req.device_id)?;

    tracing::info!(key = %req.key, "device deactivated");

    Ok(Json(DeactivateResponse {
        success: true,
        remaining_devices: remaining,
    }))
}
