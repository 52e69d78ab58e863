use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Create/update request shape for a sleep session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepInput {
    pub child_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SleepInput {
    pub fn new(child_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            child_id: child_id.into(),
            start_time,
            end_time: None,
            quality: None,
            notes: None,
        }
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }
}
