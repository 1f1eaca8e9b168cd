mod activate;
mod devices;
mod usage;
mod validate;

pub use activate::*;
pub use devices::*;
pub use usage::*;
pub use validate::*;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::AppState;
use crate::rate_limit::RateLimitLayer;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Per-IP rate limit layers for the public surface.
pub struct RateLimits {
    pub standard: RateLimitLayer,
    pub relaxed: RateLimitLayer,
}

/// Public (unauthenticated) routes. Tests pass `None` to skip rate limiting.
pub fn router(limits: Option<RateLimits>) -> Router<AppState> {
    let api = Router::new()
        .route("/activate", post(activate_device))
        .route("/validate", post(validate_device))
        .route("/usage/track", post(track_upload).get(check_usage))
        .route("/devices/deactivate", post(deactivate_device));
    let health_route = Router::new().route("/health", get(health));

    match limits {
        Some(l) => api
            .layer(l.standard)
            .merge(health_route.layer(l.relaxed)),
        None => api.merge(health_route),
    }
}
