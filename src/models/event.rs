use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Event taxonomy. Every state transition in the license core appends exactly
/// one event identifying its cause; validation/warning events are
/// observational and deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
pub enum EventType {
    #[strum(serialize = "license.created")]
    LicenseCreated,
    #[strum(serialize = "license.suspended")]
    LicenseSuspended,
    #[strum(serialize = "license.expired")]
    LicenseExpired,
    #[strum(serialize = "license.reactivated")]
    LicenseReactivated,
    #[strum(serialize = "license.updated")]
    LicenseUpdated,
    #[strum(serialize = "license.usage_warning")]
    UsageWarning,
    #[strum(serialize = "license.usage_limit_reached")]
    UsageLimitReached,
    #[strum(serialize = "activation.created")]
    ActivationCreated,
    #[strum(serialize = "activation.rejected")]
    ActivationRejected,
    #[strum(serialize = "activation.removed")]
    ActivationRemoved,
    #[strum(serialize = "validation.ok")]
    ValidationOk,
    #[strum(serialize = "validation.failed")]
    ValidationFailed,
    #[strum(serialize = "upload.success")]
    UploadSuccess,
}

/// Append-only audit record. Never mutated; deleted only by the cascade when
/// its license is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub id: String,
    pub license_id: Option<String>,
    pub teacher_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

/// Filter for the admin event-log query.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    /// License id to scope the query to.
    pub license_id: Option<String>,
    /// Exact event type tag, e.g. `activation.created`.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Maximum number of items to return (default 50, max 200).
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl EventQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
