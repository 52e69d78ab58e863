//! Domain collaborators invoked by the dispatcher.
//!
//! Each entity type is served by a [`RecordService`] over its request shape.
//! The dispatcher only ever sees these traits, so tests can substitute
//! in-memory or failing collaborators.

use async_trait::async_trait;
use carelog_core::{
    AppointmentInput, FeedingInput, MedicationInput, MedicationLogInput, NoteInput, PayloadKind,
    SleepInput, VaccinationInput,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::db::SqliteRecords;

/// A stored record as returned by a collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<I> {
    pub id: String,
    pub data: I,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors reported by collaborators.
#[derive(Debug)]
pub enum ServiceError {
    /// No record with this id.
    NotFound(String),
    /// The collaborator does not offer this operation.
    Unsupported(&'static str),
    /// The record or request could not be encoded/decoded.
    Invalid(String),
    /// Storage error.
    Storage(sqlx::Error),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::NotFound(id) => write!(f, "Record not found: {}", id),
            ServiceError::Unsupported(op) => write!(f, "Operation not supported: {}", op),
            ServiceError::Invalid(e) => write!(f, "Invalid record: {}", e),
            ServiceError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        ServiceError::Storage(e)
    }
}

/// CRUD operations of a domain collaborator for request shape `I`.
///
/// Every operation is scoped to one family; a record of another family is
/// reported as [`ServiceError::NotFound`].
#[async_trait]
pub trait RecordService<I: PayloadKind>: Send + Sync {
    /// Creates a record and returns its server-assigned id.
    ///
    /// `author` is the caller for collaborators that attribute records.
    async fn create(
        &self,
        family: &str,
        author: Option<&str>,
        input: I,
    ) -> Result<String, ServiceError>;

    async fn get(&self, family: &str, id: &str) -> Result<Option<Record<I>>, ServiceError>;

    async fn list(&self, family: &str) -> Result<Vec<Record<I>>, ServiceError>;

    /// Replaces the record's data.
    async fn update(&self, family: &str, id: &str, input: I) -> Result<(), ServiceError>;

    async fn delete(&self, family: &str, id: &str) -> Result<(), ServiceError>;

    async fn deactivate(&self, _family: &str, _id: &str) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported("deactivate"))
    }
}

/// The full set of collaborators the dispatcher routes to.
#[derive(Clone)]
pub struct Services {
    pub feeding: Arc<dyn RecordService<FeedingInput>>,
    pub sleep: Arc<dyn RecordService<SleepInput>>,
    pub medication: Arc<dyn RecordService<MedicationInput>>,
    pub medication_log: Arc<dyn RecordService<MedicationLogInput>>,
    pub note: Arc<dyn RecordService<NoteInput>>,
    pub vaccination: Arc<dyn RecordService<VaccinationInput>>,
    pub appointment: Arc<dyn RecordService<AppointmentInput>>,
}

impl Services {
    /// Collaborators backed by the server database.
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            feeding: Arc::new(SqliteRecords::new(pool.clone())),
            sleep: Arc::new(SqliteRecords::new(pool.clone())),
            medication: Arc::new(SqliteRecords::new(pool.clone())),
            medication_log: Arc::new(SqliteRecords::new(pool.clone())),
            note: Arc::new(SqliteRecords::new(pool.clone())),
            vaccination: Arc::new(SqliteRecords::new(pool.clone())),
            appointment: Arc::new(SqliteRecords::new(pool)),
        }
    }
}
