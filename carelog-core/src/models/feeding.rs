use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedingType {
    Breast,
    Bottle,
    Solid,
}

impl fmt::Display for FeedingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedingType::Breast => write!(f, "breast"),
            FeedingType::Bottle => write!(f, "bottle"),
            FeedingType::Solid => write!(f, "solid"),
        }
    }
}

impl FromStr for FeedingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "breast" => Ok(FeedingType::Breast),
            "bottle" => Ok(FeedingType::Bottle),
            "solid" => Ok(FeedingType::Solid),
            _ => Err(format!(
                "Invalid feeding type '{}'. Valid options: breast, bottle, solid",
                s
            )),
        }
    }
}

/// Create/update request shape for a feeding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingInput {
    pub child_id: String,
    #[serde(rename = "type")]
    pub feeding_type: FeedingType,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_ml: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl FeedingInput {
    pub fn new(
        child_id: impl Into<String>,
        feeding_type: FeedingType,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            child_id: child_id.into(),
            feeding_type,
            start_time,
            end_time: None,
            amount_ml: None,
            side: None,
            notes: None,
        }
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_amount_ml(mut self, amount_ml: f64) -> Self {
        self.amount_ml = Some(amount_ml);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feeding_type_uses_wire_name_type() {
        let start = DateTime::parse_from_rfc3339("2025-03-01T06:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let feeding = FeedingInput::new("child-1", FeedingType::Bottle, start).with_amount_ml(120.0);

        let json = serde_json::to_value(&feeding).unwrap();
        assert_eq!(json["type"], "bottle");
        assert_eq!(json["child_id"], "child-1");
        assert!(json.get("end_time").is_none());
    }

    #[test]
    fn test_feeding_decodes_minimal_payload() {
        let json = serde_json::json!({
            "child_id": "child-1",
            "type": "breast",
            "start_time": "2025-03-01T06:30:00Z"
        });

        let feeding: FeedingInput = serde_json::from_value(json).unwrap();
        assert_eq!(feeding.feeding_type, FeedingType::Breast);
        assert!(feeding.amount_ml.is_none());
    }

    #[test]
    fn test_feeding_type_from_str_invalid() {
        assert!(FeedingType::from_str("formula").is_err());
        assert_eq!(FeedingType::from_str("SOLID").unwrap(), FeedingType::Solid);
    }
}
