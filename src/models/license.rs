use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// License lifecycle states.
///
/// `active -> expired` happens lazily the first time a validating operation
/// observes `valid_until` in the past; `active -> suspended` on a device-limit
/// violation, quota exhaustion, or explicit admin action; `suspended -> active`
/// only via explicit admin re-activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Suspended,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub id: String,
    pub teacher_id: String,
    /// Human-shareable key, `MF-XXXXXX-XXXXXX`.
    pub key: String,
    /// Device slot capacity (1 or 2).
    pub allowed_devices: i64,
    /// Expiry instant (unix seconds).
    pub valid_until: i64,
    pub status: LicenseStatus,
    /// Upload ceiling derived from the owner's workload profile.
    pub upload_limit: i64,
    /// Consumed uploads; monotonically non-decreasing except on explicit reset.
    pub upload_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    pub fn remaining_uploads(&self) -> i64 {
        (self.upload_limit - self.upload_count).max(0)
    }

    pub fn usage_percentage(&self) -> i64 {
        if self.upload_limit <= 0 {
            return 0;
        }
        (self.upload_count as f64 / self.upload_limit as f64 * 100.0).round() as i64
    }
}

/// License joined with its owner, for admin listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseWithTeacher {
    #[serde(flatten)]
    pub license: License,
    pub teacher_name: String,
    pub teacher_email: String,
}

/// Admin issuance input: owner identity + workload profile + capacity/validity.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLicense {
    pub full_name: String,
    pub email: String,
    pub cin: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub classes_count: Option<i64>,
    #[serde(default)]
    pub tests_per_term: Option<i64>,
    /// 1 or 2 device slots.
    #[serde(default = "default_allowed_devices")]
    pub allowed_devices: i64,
    #[serde(default = "default_months_valid")]
    pub months_valid: u32,
}

fn default_allowed_devices() -> i64 {
    1
}

fn default_months_valid() -> u32 {
    10
}
