use serde::{Deserialize, Serialize};

/// License owner profile. Contact identity (`email`) and the national-id
/// field (`cin`) are unique across all teachers; `classes_count` and
/// `tests_per_term` feed the upload-quota calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teacher {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub cin: Option<String>,
    pub phone: Option<String>,
    pub level: Option<String>,
    pub subject: Option<String>,
    pub classes_count: Option<i64>,
    pub tests_per_term: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Activation-time profile submission. Only present fields are applied;
/// the upload limit is recomputed only when `classes_count` or
/// `tests_per_term` actually change value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfileUpdate {
    #[serde(default)]
    pub cin: Option<String>,
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
}

impl TeacherProfileUpdate {
    /// True when this update would change the workload fields that feed the
    /// quota calculation.
    pub fn changes_workload(&self, current: &Teacher) -> bool {
        let classes_changed = self
            .classes_count
            .is_some_and(|v| Some(v) != current.classes_count);
        let tests_changed = self
            .tests_per_term
            .is_some_and(|v| Some(v) != current.tests_per_term);
        classes_changed || tests_changed
    }
}
