//! Wire types for the push/pull sync endpoints.
//!
//! `type` and `action` stay plain strings on the wire so that a batch
//! containing an entity type one side does not know still decodes; the
//! unknown event is then rejected (server) or skipped (client) on its own.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

use crate::models::{Action, EntityType};

/// A single mutation as exchanged between client and server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl SyncEvent {
    pub fn new(id: impl Into<String>, entity_type: EntityType, action: Action) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.as_str().to_string(),
            action: action.as_str().to_string(),
            entity_id: None,
            data: None,
            timestamp: Utc::now(),
            client_id: None,
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Parses the `type` field. Unknown types yield an error message.
    pub fn parsed_entity_type(&self) -> Result<EntityType, String> {
        EntityType::from_str(&self.entity_type)
    }

    /// Parses the `action` field. Unknown actions yield an error message.
    pub fn parsed_action(&self) -> Result<Action, String> {
        Action::from_str(&self.action)
    }

    /// The addressed entity id; an empty string counts as absent.
    pub fn target_id(&self) -> Option<&str> {
        self.entity_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Body of `POST /sync/push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub client_id: String,
    pub events: Vec<SyncEvent>,
}

/// Response of `POST /sync/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub processed: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_ids: Vec<String>,
    /// Event id -> entity id assigned by the server, for create events.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub results: HashMap<String, String>,
    pub server_time: DateTime<Utc>,
}

impl PushResponse {
    /// Whether the server applied the given event.
    pub fn succeeded(&self, event_id: &str) -> bool {
        !self.failed_ids.iter().any(|id| id == event_id)
    }
}

/// Response of `GET /sync/pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub events: Vec<SyncEvent>,
    pub server_time: DateTime<Utc>,
    pub has_more: bool,
}

/// Response of `GET /sync/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Newest checkpoint known to the server, empty when nothing was recorded.
    pub last_sync: String,
    pub pending: i64,
    pub server_time: DateTime<Utc>,
}

/// Formats a checkpoint with fixed microsecond precision.
///
/// A fixed width keeps lexical order equal to chronological order, so stored
/// checkpoints can be compared as strings.
pub fn checkpoint_string(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Generates a fresh event id.
pub fn generate_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generates an id identifying this device to the server.
pub fn generate_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = SyncEvent::new("e1", EntityType::MedicationLog, Action::Create)
            .with_data(json!({ "medication_id": "m1", "given_at": "2025-01-01T08:00:00Z" }))
            .with_client_id("phone");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "medication_log");
        assert_eq!(value["action"], "create");
        assert_eq!(value["client_id"], "phone");
        assert!(value.get("entity_id").is_none());
    }

    #[test]
    fn test_delete_event_omits_data() {
        let event = SyncEvent::new("e2", EntityType::Note, Action::Delete).with_entity_id("n1");

        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("data").is_none());
        assert_eq!(value["entity_id"], "n1");
    }

    #[test]
    fn test_unknown_type_still_decodes() {
        let json = json!({
            "id": "e3",
            "type": "diaper",
            "action": "create",
            "data": { "wet": true },
            "timestamp": "2025-01-01T00:00:00Z"
        });

        let event: SyncEvent = serde_json::from_value(json).unwrap();
        assert!(event.parsed_entity_type().is_err());
        assert_eq!(event.parsed_action().unwrap(), Action::Create);
    }

    #[test]
    fn test_empty_entity_id_is_absent() {
        let event = SyncEvent::new("e4", EntityType::Sleep, Action::Create).with_entity_id("");
        assert!(event.target_id().is_none());
    }

    #[test]
    fn test_push_response_omits_empty_collections() {
        let response = PushResponse {
            processed: 1,
            failed: 0,
            failed_ids: Vec::new(),
            results: HashMap::new(),
            server_time: Utc::now(),
        };

        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("failed_ids").is_none());
        assert!(value.get("results").is_none());

        let parsed: PushResponse = serde_json::from_value(value).unwrap();
        assert!(parsed.succeeded("anything"));
    }

    #[test]
    fn test_checkpoint_string_is_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2025-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(checkpoint_string(&a), "2025-01-01T00:00:00.000000Z");
        assert!(checkpoint_string(&a) < checkpoint_string(&b));
    }
}
