//! Carelog Core Library
//!
//! Shared types for Carelog applications: the entity and action vocabulary,
//! per-entity input shapes, and the push/pull wire protocol spoken between the
//! offline client and the sync server.

pub mod models;
pub mod sync;

pub use models::{
    Action, AppointmentInput, EntityType, EventPayload, FeedingInput, FeedingType,
    MedicationInput, MedicationLogInput, NoteInput, PayloadKind, SleepInput, VaccinationInput,
};
pub use sync::{
    checkpoint_string, generate_client_id, generate_event_id, PullResponse, PushRequest,
    PushResponse, StatusResponse, SyncError, SyncEvent,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
