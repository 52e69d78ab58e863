mod action;
mod appointment;
mod entity_type;
mod feeding;
mod medication;
mod note;
mod payload;
mod sleep;
mod vaccination;

pub use action::Action;
pub use appointment::AppointmentInput;
pub use entity_type::EntityType;
pub use feeding::{FeedingInput, FeedingType};
pub use medication::{MedicationInput, MedicationLogInput};
pub use note::NoteInput;
pub use payload::{EventPayload, PayloadKind};
pub use sleep::SleepInput;
pub use vaccination::VaccinationInput;
