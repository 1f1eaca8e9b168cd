use serde::{Deserialize, Serialize};

/// One device's claim against a license. `(license_id, device_id)` is unique;
/// re-activating the same device only refreshes the liveness fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub id: String,
    pub license_id: String,
    /// Client-supplied opaque device fingerprint.
    pub device_id: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    /// Loosely-typed client metadata bag (platform, Excel version, ...).
    pub metadata: Option<serde_json::Value>,
    pub activated_at: i64,
    pub last_seen_at: i64,
    pub last_ip: Option<String>,
}

/// Request-scoped client context captured alongside a claim or heartbeat.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of an accepted device claim.
#[derive(Debug)]
pub enum DeviceClaim {
    /// First successful claim from this fingerprint; a slot was consumed.
    New(Activation),
    /// Known fingerprint; liveness refreshed, no new slot consumed.
    Existing(Activation),
}

impl DeviceClaim {
    pub fn is_new_device(&self) -> bool {
        matches!(self, DeviceClaim::New(_))
    }

    pub fn activation(&self) -> &Activation {
        match self {
            DeviceClaim::New(a) | DeviceClaim::Existing(a) => a,
        }
    }
}
