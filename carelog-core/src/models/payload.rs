//! Tagged union over the per-entity request shapes.
//!
//! The `data` field of a sync event has no self-describing tag; its shape is
//! determined by the event's `type`. Payloads are therefore decoded only once
//! the entity type is known, via [`EventPayload::decode`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{
    AppointmentInput, EntityType, FeedingInput, MedicationInput, MedicationLogInput, NoteInput,
    SleepInput, VaccinationInput,
};

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Feeding(FeedingInput),
    Sleep(SleepInput),
    Medication(MedicationInput),
    MedicationLog(MedicationLogInput),
    Note(NoteInput),
    Vaccination(VaccinationInput),
    Appointment(AppointmentInput),
}

impl EventPayload {
    /// Decodes `data` as the request shape belonging to `entity_type`.
    pub fn decode(entity_type: EntityType, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match entity_type {
            EntityType::Feeding => EventPayload::Feeding(serde_json::from_value(data)?),
            EntityType::Sleep => EventPayload::Sleep(serde_json::from_value(data)?),
            EntityType::Medication => EventPayload::Medication(serde_json::from_value(data)?),
            EntityType::MedicationLog => {
                EventPayload::MedicationLog(serde_json::from_value(data)?)
            }
            EntityType::Note => EventPayload::Note(serde_json::from_value(data)?),
            EntityType::Vaccination => EventPayload::Vaccination(serde_json::from_value(data)?),
            EntityType::Appointment => EventPayload::Appointment(serde_json::from_value(data)?),
        })
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            EventPayload::Feeding(_) => EntityType::Feeding,
            EventPayload::Sleep(_) => EntityType::Sleep,
            EventPayload::Medication(_) => EntityType::Medication,
            EventPayload::MedicationLog(_) => EntityType::MedicationLog,
            EventPayload::Note(_) => EntityType::Note,
            EventPayload::Vaccination(_) => EntityType::Vaccination,
            EventPayload::Appointment(_) => EntityType::Appointment,
        }
    }

    /// Encodes the inner request shape as the untagged `data` value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            EventPayload::Feeding(p) => serde_json::to_value(p),
            EventPayload::Sleep(p) => serde_json::to_value(p),
            EventPayload::Medication(p) => serde_json::to_value(p),
            EventPayload::MedicationLog(p) => serde_json::to_value(p),
            EventPayload::Note(p) => serde_json::to_value(p),
            EventPayload::Vaccination(p) => serde_json::to_value(p),
            EventPayload::Appointment(p) => serde_json::to_value(p),
        }
    }
}

/// A request shape that belongs to exactly one entity type.
pub trait PayloadKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    const ENTITY: EntityType;

    /// Extracts this shape from the union, or `None` for another variant.
    fn from_payload(payload: EventPayload) -> Option<Self>;
}

macro_rules! payload_kind {
    ($input:ty, $variant:ident) => {
        impl PayloadKind for $input {
            const ENTITY: EntityType = EntityType::$variant;

            fn from_payload(payload: EventPayload) -> Option<Self> {
                match payload {
                    EventPayload::$variant(input) => Some(input),
                    _ => None,
                }
            }
        }
    };
}

payload_kind!(FeedingInput, Feeding);
payload_kind!(SleepInput, Sleep);
payload_kind!(MedicationInput, Medication);
payload_kind!(MedicationLogInput, MedicationLog);
payload_kind!(NoteInput, Note);
payload_kind!(VaccinationInput, Vaccination);
payload_kind!(AppointmentInput, Appointment);
