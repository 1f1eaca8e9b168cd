mod events;
mod licenses;
mod teachers;

pub use events::*;
pub use licenses::*;
pub use teachers::*;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};

use crate::db::AppState;
use crate::middleware::admin_auth;

/// Admin routes. Every route requires a bearer JWT with `role == "admin"`.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/licenses", post(issue_license))
        .route("/admin/licenses", get(list_licenses))
        .route("/admin/licenses", patch(update_license_status))
        .route("/admin/licenses/{key}", get(get_license))
        .route("/admin/licenses/{key}", delete(delete_license))
        .route("/admin/teachers/{teacher_id}/limits", post(recompute_limits))
        .route("/admin/events", get(list_events))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}
