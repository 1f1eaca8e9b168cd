use axum::extract::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::{Json, Path};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeLimitsRequest {
    pub tests_per_term: Option<i64>,
    pub classes_count: Option<i64>,
}

/// POST /admin/teachers/{id}/limits - set workload and recompute the upload
/// ceiling across every license the teacher owns. Absent fields keep their
/// stored values.
pub async fn recompute_limits(
    State(state): State<AppState>,
    Path(teacher_id): Path<String>,
    Json(req): Json<RecomputeLimitsRequest>,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let new_limit = queries::recompute_teacher_limits(
        &mut conn,
        &teacher_id,
        req.tests_per_term,
        req.classes_count,
    )?;

    tracing::info!(teacher_id = %teacher_id, new_limit, "upload limits recomputed");

    Ok(Json(json!({ "newUploadLimit": new_limit })))
}
