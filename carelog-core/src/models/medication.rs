use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_active() -> bool {
    true
}

/// Create/update request shape for a medication.
///
/// `active` flips to false when the medication is deactivated; deactivated
/// medications are kept so their logs stay meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationInput {
    pub child_id: String,
    pub name: String,
    pub dosage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl MedicationInput {
    pub fn new(
        child_id: impl Into<String>,
        name: impl Into<String>,
        dosage: impl Into<String>,
    ) -> Self {
        Self {
            child_id: child_id.into(),
            name: name.into(),
            dosage: dosage.into(),
            frequency: None,
            instructions: None,
            active: true,
        }
    }

    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = Some(frequency.into());
        self
    }
}

/// A single administered dose. Logs are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationLogInput {
    pub medication_id: String,
    pub given_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MedicationLogInput {
    pub fn new(medication_id: impl Into<String>, given_at: DateTime<Utc>) -> Self {
        Self {
            medication_id: medication_id.into(),
            given_at,
            dosage: None,
            notes: None,
        }
    }
}
