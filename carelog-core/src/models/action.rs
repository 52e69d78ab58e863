use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a sync event does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    Deactivate,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Deactivate => "deactivate",
        }
    }

    /// Every action except create addresses an existing entity.
    pub fn requires_entity_id(&self) -> bool {
        !matches!(self, Action::Create)
    }

    /// Create and update carry a payload; delete and deactivate do not.
    pub fn carries_payload(&self) -> bool {
        matches!(self, Action::Create | Action::Update)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "deactivate" => Ok(Action::Deactivate),
            _ => Err(format!(
                "Invalid action '{}'. Valid options: create, update, delete, deactivate",
                s
            )),
        }
    }
}
