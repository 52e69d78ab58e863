//! Push synchronizer: drains the mutation queue to the server.

use carelog_core::{generate_event_id, PushRequest, SyncError};
use chrono::Duration;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::transport::SyncTransport;
use crate::db::{LocalStore, MutationQueue, QueuedEvent, StoreError, SyncState};

/// Attempts after which an event is left for the user to release.
pub const MAX_RETRIES: u32 = 3;

/// Seconds a push run may hold the lease without renewing it.
const LEASE_TTL_SECS: i64 = 120;

fn lease_ttl() -> Duration {
    Duration::seconds(LEASE_TTL_SECS)
}

/// Outcome of one push run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    pub synced: usize,
    pub failed: usize,
    /// Events held back because an earlier event of the same record, or of a
    /// record their data references, failed.
    pub deferred: usize,
}

#[derive(Debug)]
pub enum PushError {
    /// Another push run is in progress.
    AlreadyRunning,
    /// The local database failed; the run stopped.
    Storage(StoreError),
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::AlreadyRunning => write!(f, "A push is already in progress"),
            PushError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PushError::Storage(e) => Some(e),
            PushError::AlreadyRunning => None,
        }
    }
}

impl From<StoreError> for PushError {
    fn from(e: StoreError) -> Self {
        PushError::Storage(e)
    }
}

/// Submits queued events in FIFO order, one per request.
///
/// An event leaves the queue only after the server accepted it. Failed
/// events stay queued with their retry counter raised; once a record has a
/// failed event, its later events wait for the next run, as do events whose
/// data references such a record. Runs are serialized across processes by a
/// lease in the local database.
pub struct PushSynchronizer {
    store: LocalStore,
    queue: MutationQueue,
    state: SyncState,
    transport: Arc<dyn SyncTransport>,
    holder: String,
}

impl PushSynchronizer {
    pub fn new(store: LocalStore, state: SyncState, transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            queue: store.queue(),
            store,
            state,
            transport,
            holder: generate_event_id(),
        }
    }

    pub async fn run(&self) -> Result<PushReport, PushError> {
        if !self.state.acquire_push_lease(&self.holder, lease_ttl()).await? {
            return Err(PushError::AlreadyRunning);
        }

        let result = self.drain().await;
        let released = self.state.release_push_lease(&self.holder).await;
        let report = result?;
        released?;
        Ok(report)
    }

    async fn drain(&self) -> Result<PushReport, PushError> {
        let client_id = self.state.client_id().await?;
        let events = self.queue.list().await?;
        let mut report = PushReport::default();
        let mut held: HashSet<String> = HashSet::new();

        for event in events {
            if !self.state.acquire_push_lease(&self.holder, lease_ttl()).await? {
                tracing::warn!("Push lease lost; stopping");
                return Err(PushError::AlreadyRunning);
            }

            let record = self.resolve(&event.record_id).await?;
            if held.contains(&record) {
                report.deferred += 1;
                continue;
            }

            let (data, references) = self.resolve_references(&event).await?;
            if references.iter().any(|id| held.contains(id)) {
                report.deferred += 1;
                held.insert(record);
                continue;
            }

            if event.retry_count >= MAX_RETRIES {
                tracing::warn!(
                    "Event {} ({} {}) exhausted its retries",
                    event.id,
                    event.action,
                    event.entity_type
                );
                report.failed += 1;
                held.insert(record);
                continue;
            }

            let entity_id = match &event.entity_id {
                Some(id) => Some(self.resolve(id).await?),
                None => None,
            };

            match self.submit(&client_id, &event, entity_id, data).await {
                Ok(assigned) => {
                    self.store.confirm(&event, assigned.as_deref()).await?;
                    report.synced += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Push of {} ({} {}) failed: {}",
                        event.id,
                        event.action,
                        event.entity_type,
                        e
                    );
                    self.queue.increment_retry(&event.id).await?;
                    report.failed += 1;
                    held.insert(record);
                }
            }
        }

        tracing::info!(
            "Push: {} synced, {} failed, {} deferred",
            report.synced,
            report.failed,
            report.deferred
        );
        Ok(report)
    }

    async fn resolve(&self, id: &str) -> Result<String, StoreError> {
        Ok(self
            .store
            .resolve(id)
            .await?
            .unwrap_or_else(|| id.to_string()))
    }

    /// The event's data with record references replaced by server ids where
    /// known, plus the resolved ids it references.
    async fn resolve_references(
        &self,
        event: &QueuedEvent,
    ) -> Result<(Option<Value>, Vec<String>), StoreError> {
        let mut data = event.data.clone();
        let mut references = Vec::new();

        if let Some(Value::Object(fields)) = data.as_mut() {
            for (field, _) in event.entity_type.references() {
                let Some(Value::String(id)) = fields.get(*field) else {
                    continue;
                };
                let resolved = self.resolve(id).await?;
                fields.insert(field.to_string(), Value::String(resolved.clone()));
                references.push(resolved);
            }
        }

        Ok((data, references))
    }

    /// Sends one event. Returns the server-assigned id for creates.
    async fn submit(
        &self,
        client_id: &str,
        event: &QueuedEvent,
        entity_id: Option<String>,
        data: Option<Value>,
    ) -> Result<Option<String>, SyncError> {
        let mut wire = event.to_sync_event(client_id, entity_id);
        wire.data = data;
        let request = PushRequest {
            client_id: client_id.to_string(),
            events: vec![wire],
        };
        let response = self.transport.push(&request).await?;

        if !response.succeeded(&event.id) {
            return Err(SyncError::Rejected(event.id.clone()));
        }

        Ok(response.results.get(&event.id).cloned())
    }
}
