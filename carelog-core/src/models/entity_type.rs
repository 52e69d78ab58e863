use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::action::Action;

/// The kinds of child-care records that travel through sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Feeding,
    Sleep,
    Medication,
    MedicationLog,
    Note,
    Vaccination,
    Appointment,
}

impl EntityType {
    pub const ALL: [EntityType; 7] = [
        EntityType::Feeding,
        EntityType::Sleep,
        EntityType::Medication,
        EntityType::MedicationLog,
        EntityType::Note,
        EntityType::Vaccination,
        EntityType::Appointment,
    ];

    /// Wire name used in the `type` field of a sync event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Feeding => "feeding",
            EntityType::Sleep => "sleep",
            EntityType::Medication => "medication",
            EntityType::MedicationLog => "medication_log",
            EntityType::Note => "note",
            EntityType::Vaccination => "vaccination",
            EntityType::Appointment => "appointment",
        }
    }

    /// Name of the table holding records of this type, on both client and server.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::Feeding => "feedings",
            EntityType::Sleep => "sleeps",
            EntityType::Medication => "medications",
            EntityType::MedicationLog => "medication_logs",
            EntityType::Note => "notes",
            EntityType::Vaccination => "vaccinations",
            EntityType::Appointment => "appointments",
        }
    }

    /// Fields of this type's data that hold the id of another record, with
    /// the type of the record they point at.
    pub fn references(&self) -> &'static [(&'static str, EntityType)] {
        match self {
            EntityType::MedicationLog => &[("medication_id", EntityType::Medication)],
            _ => &[],
        }
    }

    /// Whether the server accepts `action` for this entity type.
    ///
    /// Medication logs are append-only; only medications can be deactivated.
    pub fn supports(&self, action: Action) -> bool {
        match (self, action) {
            (EntityType::MedicationLog, Action::Create) => true,
            (EntityType::MedicationLog, _) => false,
            (EntityType::Medication, Action::Deactivate) => true,
            (_, Action::Deactivate) => false,
            _ => true,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "feeding" => Ok(EntityType::Feeding),
            "sleep" => Ok(EntityType::Sleep),
            "medication" => Ok(EntityType::Medication),
            "medication_log" | "medicationlog" => Ok(EntityType::MedicationLog),
            "note" => Ok(EntityType::Note),
            "vaccination" => Ok(EntityType::Vaccination),
            "appointment" => Ok(EntityType::Appointment),
            _ => Err(format!(
                "Invalid entity type '{}'. Valid options: feeding, sleep, medication, \
                 medication_log, note, vaccination, appointment",
                s
            )),
        }
    }
}
