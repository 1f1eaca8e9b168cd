use axum::extract::State;
use serde_json::{json, Value};

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::models::EventQuery;

/// GET /admin/events - audit log, newest first, filterable by license and
/// event type.
pub async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<EventQuery>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let events = queries::query_events(&conn, &q)?;
    Ok(Json(json!({
        "events": events,
        "limit": q.limit(),
        "offset": q.offset(),
    })))
}
