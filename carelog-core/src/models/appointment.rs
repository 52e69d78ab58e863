use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Create/update request shape for an appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentInput {
    pub child_id: String,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

impl AppointmentInput {
    pub fn new(
        child_id: impl Into<String>,
        title: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            child_id: child_id.into(),
            title: title.into(),
            scheduled_at,
            location: None,
            provider: None,
            notes: None,
            completed: false,
        }
    }
}
