use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
///
/// Domain rejections (suspended/expired license, device-limit violation,
/// quota exhaustion, ...) are expected outcomes with a stable `error` tag in
/// the response body so clients can branch on them. Store failures map to a
/// generic 500 and are only logged server-side.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("License is suspended")]
    LicenseSuspended,

    #[error("License has expired")]
    LicenseExpired,

    #[error("Device limit exceeded ({devices_used}/{max_devices})")]
    DeviceLimitExceeded { devices_used: i64, max_devices: i64 },

    #[error("Device not activated for this license")]
    DeviceNotActivated,

    #[error("Upload limit reached ({upload_count}/{upload_limit})")]
    QuotaExhausted { upload_count: i64, upload_limit: i64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable tag for the response body.
    pub fn tag(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::LicenseSuspended => "license_suspended",
            AppError::LicenseExpired => "license_expired",
            AppError::DeviceLimitExceeded { .. } => "device_limit_exceeded",
            AppError::DeviceNotActivated => "device_not_activated",
            AppError::QuotaExhausted { .. } => "quota_exhausted",
            AppError::Json(_) => "bad_request",
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => "internal",
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rej: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rej.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rej: axum::extract::rejection::QueryRejection) -> Self {
        AppError::BadRequest(rej.body_text())
    }
}

impl From<axum::extract::rejection::PathRejection> for AppError {
    fn from(rej: axum::extract::rejection::PathRejection) -> Self {
        AppError::BadRequest(rej.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_)
            | AppError::LicenseSuspended
            | AppError::LicenseExpired
            | AppError::DeviceLimitExceeded { .. }
            | AppError::DeviceNotActivated
            | AppError::QuotaExhausted { .. } => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Store errors keep their detail out of the response body.
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let tag = self.tag();
        let mut body = json!({
            "error": tag,
            "message": message,
        });

        match &self {
            AppError::DeviceLimitExceeded {
                devices_used,
                max_devices,
            } => {
                body["devicesUsed"] = json!(devices_used);
                body["maxDevices"] = json!(max_devices);
            }
            AppError::QuotaExhausted {
                upload_count,
                upload_limit,
            } => {
                body["uploadCount"] = json!(upload_count);
                body["uploadLimit"] = json!(upload_limit);
                body["blocked"] = json!(true);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

/// True when the underlying SQLite error is a UNIQUE constraint violation.
/// Used to surface duplicate teacher identity fields as 409 instead of 500.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub type Result<T> = std::result::Result<T, AppError>;
