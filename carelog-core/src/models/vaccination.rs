use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Create/update request shape for a vaccination, given or scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaccinationInput {
    pub child_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub administered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl VaccinationInput {
    pub fn new(child_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            name: name.into(),
            dose: None,
            administered_at: None,
            due_date: None,
            provider: None,
            notes: None,
        }
    }
}
