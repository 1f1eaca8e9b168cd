use axum::extract::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::queries::{self, UploadDenial};
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Query};

/// Low-quota warning threshold for the response hint. The audit-log warning
/// event uses the 90% threshold instead; this one is about giving the add-in
/// a string to show the teacher.
const LOW_QUOTA_HINT: i64 = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub key: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// POST /usage/track - record one upload against the quota.
///
/// The upload that consumes the last unit succeeds and reports
/// `suspended: true`; everything after it gets a 403 `quota_exhausted`.
pub async fn track_upload(
    State(state): State<AppState>,
    Json(req): Json<TrackRequest>,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let outcome = queries::record_upload_atomic(&mut conn, &req.key, req.metadata.as_ref())?;

    let license = &outcome.license;
    let remaining = license.remaining_uploads();

    let mut body = json!({
        "success": true,
        "uploadCount": license.upload_count,
        "uploadLimit": license.upload_limit,
        "remainingUploads": remaining,
        "usagePercentage": license.usage_percentage(),
        "suspended": outcome.suspended,
    });
    if outcome.suspended {
        body["warning"] = json!("Upload limit reached; license suspended. Contact support.");
    } else if remaining <= LOW_QUOTA_HINT {
        body["warning"] = json!(format!("Only {} uploads remaining.", remaining));
    }

    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct CheckUsageQuery {
    pub key: String,
}

/// GET /usage/track?key= - read-only quota probe.
///
/// Unlike the POST path this never rejects a known key: a denial is reported
/// as `allowed: false` with the reason, so the add-in can pre-flight an
/// upload without tripping error handling.
pub async fn check_usage(
    State(state): State<AppState>,
    Query(q): Query<CheckUsageQuery>,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let gate = queries::check_upload_allowed(&mut conn, &q.key)?;

    let license = &gate.license;
    let reason = gate.denial.map(|d| match d {
        UploadDenial::Suspended => "license_suspended",
        UploadDenial::Expired => "license_expired",
        UploadDenial::QuotaExhausted => "quota_exhausted",
    });

    Ok(Json(json!({
        "allowed": gate.denial.is_none(),
        "reason": reason,
        "uploadCount": license.upload_count,
        "uploadLimit": license.upload_limit,
        "remainingUploads": license.remaining_uploads(),
        "usagePercentage": license.usage_percentage(),
        "status": license.status,
    })))
}
