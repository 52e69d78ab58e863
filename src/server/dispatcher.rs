//! Event dispatcher.
//!
//! Replays a batch of client events against the domain collaborators. Routing
//! is a table from `(entity type, action)` to a handler, built once when the
//! dispatcher is constructed. Every event is applied on its own: a failing
//! event is recorded in the outcome and the batch carries on.

use carelog_core::{
    Action, AppointmentInput, EntityType, EventPayload, FeedingInput, MedicationInput,
    MedicationLogInput, NoteInput, PayloadKind, SleepInput, SyncEvent, VaccinationInput,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::auth::AuthUser;
use super::services::{RecordService, ServiceError, Services};

/// Errors applying a single event. None of these abort a batch.
#[derive(Debug)]
pub enum DispatchError {
    /// The `type` field names no known entity type.
    UnknownEntityType(String),
    /// The `action` field names no known action.
    UnknownAction(String),
    /// The action exists but is not routed for this entity type.
    UnsupportedAction {
        entity_type: EntityType,
        action: Action,
    },
    /// Update/delete/deactivate without an entity id.
    MissingEntityId,
    /// Create carrying an entity id; the server assigns identity.
    UnexpectedEntityId,
    /// Create/update without data.
    MissingPayload,
    /// Data does not match the entity type's request shape.
    InvalidPayload(String),
    /// The collaborator rejected the operation.
    Service(ServiceError),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::UnknownEntityType(t) => write!(f, "Unknown entity type: {}", t),
            DispatchError::UnknownAction(a) => write!(f, "Unknown action: {}", a),
            DispatchError::UnsupportedAction {
                entity_type,
                action,
            } => write!(f, "Action '{}' not supported for {}", action, entity_type),
            DispatchError::MissingEntityId => write!(f, "Missing entity_id"),
            DispatchError::UnexpectedEntityId => write!(f, "Create must not carry an entity_id"),
            DispatchError::MissingPayload => write!(f, "Missing data"),
            DispatchError::InvalidPayload(e) => write!(f, "Invalid data: {}", e),
            DispatchError::Service(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Service(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ServiceError> for DispatchError {
    fn from(e: ServiceError) -> Self {
        DispatchError::Service(e)
    }
}

/// One event that was applied, with the id of the entity it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedEvent {
    pub event_id: String,
    pub entity_id: String,
}

/// Accumulated result of a batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
    /// Event id -> entity id assigned by the collaborator, for creates.
    pub results: HashMap<String, String>,
    /// Applied events in batch order.
    pub applied: Vec<AppliedEvent>,
    pub server_time: DateTime<Utc>,
}

/// Everything a handler needs from the event.
struct Invocation {
    caller_id: String,
    family_id: String,
    entity_id: Option<String>,
    data: Option<Value>,
}

impl Invocation {
    fn target(&self) -> Result<&str, DispatchError> {
        self.entity_id
            .as_deref()
            .ok_or(DispatchError::MissingEntityId)
    }

    /// Decodes the data as `I`, now that the entity type is known.
    fn payload<I: PayloadKind>(&mut self) -> Result<I, DispatchError> {
        let data = self.data.take().ok_or(DispatchError::MissingPayload)?;
        let payload = EventPayload::decode(I::ENTITY, data)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
        I::from_payload(payload).ok_or_else(|| {
            DispatchError::InvalidPayload(format!("data is not a {}", I::ENTITY))
        })
    }
}

type HandlerFuture = BoxFuture<'static, Result<Option<String>, DispatchError>>;
type Handler = Box<dyn Fn(&Services, Invocation) -> HandlerFuture + Send + Sync>;
type Select<I> = fn(&Services) -> Arc<dyn RecordService<I>>;

/// Whether a collaborator's create is attributed to the caller.
#[derive(Clone, Copy)]
enum Authorship {
    Anonymous,
    Caller,
}

fn create<I: PayloadKind>(select: Select<I>, authorship: Authorship) -> Handler {
    Box::new(move |services: &Services, mut invocation: Invocation| -> HandlerFuture {
        let service = select(services);
        Box::pin(async move {
            let input = invocation.payload::<I>()?;
            let author = match authorship {
                Authorship::Caller => Some(invocation.caller_id.as_str()),
                Authorship::Anonymous => None,
            };
            let id = service
                .create(&invocation.family_id, author, input)
                .await?;
            Ok(Some(id))
        })
    })
}

fn update<I: PayloadKind>(select: Select<I>) -> Handler {
    Box::new(move |services: &Services, mut invocation: Invocation| -> HandlerFuture {
        let service = select(services);
        Box::pin(async move {
            let input = invocation.payload::<I>()?;
            service
                .update(&invocation.family_id, invocation.target()?, input)
                .await?;
            Ok(None)
        })
    })
}

fn delete<I: PayloadKind>(select: Select<I>) -> Handler {
    Box::new(move |services: &Services, invocation: Invocation| -> HandlerFuture {
        let service = select(services);
        Box::pin(async move {
            service
                .delete(&invocation.family_id, invocation.target()?)
                .await?;
            Ok(None)
        })
    })
}

fn deactivate<I: PayloadKind>(select: Select<I>) -> Handler {
    Box::new(move |services: &Services, invocation: Invocation| -> HandlerFuture {
        let service = select(services);
        Box::pin(async move {
            service
                .deactivate(&invocation.family_id, invocation.target()?)
                .await?;
            Ok(None)
        })
    })
}

/// Routes events to collaborators. Holds no state between events.
pub struct Dispatcher {
    services: Services,
    handlers: HashMap<(EntityType, Action), Handler>,
}

impl Dispatcher {
    pub fn new(services: Services) -> Self {
        let mut handlers: HashMap<(EntityType, Action), Handler> = HashMap::new();

        fn crud<I: PayloadKind>(
            handlers: &mut HashMap<(EntityType, Action), Handler>,
            select: Select<I>,
            authorship: Authorship,
        ) {
            handlers.insert((I::ENTITY, Action::Create), create(select, authorship));
            handlers.insert((I::ENTITY, Action::Update), update(select));
            handlers.insert((I::ENTITY, Action::Delete), delete(select));
        }

        crud::<FeedingInput>(&mut handlers, |s| s.feeding.clone(), Authorship::Anonymous);
        crud::<SleepInput>(&mut handlers, |s| s.sleep.clone(), Authorship::Anonymous);
        crud::<AppointmentInput>(&mut handlers, |s| s.appointment.clone(), Authorship::Anonymous);
        crud::<VaccinationInput>(&mut handlers, |s| s.vaccination.clone(), Authorship::Anonymous);
        crud::<MedicationInput>(&mut handlers, |s| s.medication.clone(), Authorship::Anonymous);
        crud::<NoteInput>(&mut handlers, |s| s.note.clone(), Authorship::Caller);

        handlers.insert(
            (EntityType::Medication, Action::Deactivate),
            deactivate::<MedicationInput>(|s| s.medication.clone()),
        );
        handlers.insert(
            (EntityType::MedicationLog, Action::Create),
            create::<MedicationLogInput>(|s| s.medication_log.clone(), Authorship::Caller),
        );

        Self { services, handlers }
    }

    /// Whether an `(entity type, action)` pair has a handler.
    pub fn routes(&self, entity_type: EntityType, action: Action) -> bool {
        self.handlers.contains_key(&(entity_type, action))
    }

    /// Applies one event on behalf of `caller` and returns the assigned entity
    /// id for creates. The event only reaches records of the caller's family.
    pub async fn dispatch(
        &self,
        caller: &AuthUser,
        event: &SyncEvent,
    ) -> Result<Option<String>, DispatchError> {
        let entity_type = event
            .parsed_entity_type()
            .map_err(|_| DispatchError::UnknownEntityType(event.entity_type.clone()))?;
        let action = event
            .parsed_action()
            .map_err(|_| DispatchError::UnknownAction(event.action.clone()))?;

        let handler = self
            .handlers
            .get(&(entity_type, action))
            .ok_or(DispatchError::UnsupportedAction {
                entity_type,
                action,
            })?;

        let entity_id = event.target_id().map(str::to_string);
        match (action.requires_entity_id(), &entity_id) {
            (true, None) => return Err(DispatchError::MissingEntityId),
            (false, Some(_)) => return Err(DispatchError::UnexpectedEntityId),
            _ => {}
        }

        let invocation = Invocation {
            caller_id: caller.user_id.clone(),
            family_id: caller.family_id.clone(),
            entity_id,
            data: event.data.clone(),
        };

        handler(&self.services, invocation).await
    }

    /// Applies a batch in order, isolating failures per event.
    pub async fn push(&self, caller: &AuthUser, batch: &[SyncEvent]) -> BatchOutcome {
        let mut processed = 0;
        let mut failed_ids = Vec::new();
        let mut results = HashMap::new();
        let mut applied = Vec::new();

        for event in batch {
            match self.dispatch(caller, event).await {
                Ok(assigned) => {
                    processed += 1;
                    let entity_id = match assigned {
                        Some(id) => {
                            results.insert(event.id.clone(), id.clone());
                            id
                        }
                        None => event.target_id().unwrap_or_default().to_string(),
                    };
                    tracing::debug!(
                        "Applied {} {} {} for {}",
                        event.action,
                        event.entity_type,
                        entity_id,
                        caller.user_id
                    );
                    applied.push(AppliedEvent {
                        event_id: event.id.clone(),
                        entity_id,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Event {} ({} {}) failed: {}",
                        event.id,
                        event.action,
                        event.entity_type,
                        e
                    );
                    failed_ids.push(event.id.clone());
                }
            }
        }

        BatchOutcome {
            processed,
            failed: failed_ids.len(),
            failed_ids,
            results,
            applied,
            server_time: Utc::now(),
        }
    }
}
