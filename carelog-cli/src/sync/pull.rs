//! Pull reconciler: applies changes recorded on the server by other devices.

use carelog_core::{Action, EntityType, EventPayload, SyncError, SyncEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::transport::SyncTransport;
use crate::db::{LocalStore, StoreError, SyncState};

/// Upper bound on pages fetched in one run.
pub const MAX_PAGES: usize = 100;

/// Outcome of one pull run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    pub applied: usize,
    /// Events this client cannot interpret.
    pub skipped: usize,
    /// Events for records with unconfirmed local changes, held for later.
    pub deferred: usize,
    /// Held events applied now that their record has no local changes.
    pub replayed: usize,
    pub pages: usize,
}

#[derive(Debug)]
pub enum PullError {
    Transport(SyncError),
    Storage(StoreError),
}

impl std::fmt::Display for PullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullError::Transport(e) => write!(f, "{}", e),
            PullError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PullError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PullError::Transport(e) => Some(e),
            PullError::Storage(e) => Some(e),
        }
    }
}

impl From<SyncError> for PullError {
    fn from(e: SyncError) -> Self {
        PullError::Transport(e)
    }
}

impl From<StoreError> for PullError {
    fn from(e: StoreError) -> Self {
        PullError::Storage(e)
    }
}

enum Applied {
    Yes,
    Skipped,
    Deferred,
}

/// Pages through remote changes and upserts them into the local store.
///
/// The checkpoint is saved after every page, so an interrupted run resumes
/// where it stopped. Events for records with local changes are held in the
/// local database and replayed by a later run once those changes are gone.
pub struct PullReconciler {
    store: LocalStore,
    state: SyncState,
    transport: Arc<dyn SyncTransport>,
}

impl PullReconciler {
    pub fn new(store: LocalStore, state: SyncState, transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            store,
            state,
            transport,
        }
    }

    /// Pulls changes made by other devices since the saved checkpoint.
    pub async fn run(&self) -> Result<PullReport, PullError> {
        let client_id = self.state.client_id().await?;
        let checkpoint = self.state.last_pull().await?;
        self.pull_from(checkpoint, Some(&client_id)).await
    }

    /// Forgets the checkpoint and pulls every recorded change again, this
    /// device's own included, restoring server state for records without
    /// local changes.
    pub async fn run_full(&self) -> Result<PullReport, PullError> {
        self.state.reset_last_pull().await?;
        self.pull_from(None, None).await
    }

    async fn pull_from(
        &self,
        mut checkpoint: Option<DateTime<Utc>>,
        exclude_client: Option<&str>,
    ) -> Result<PullReport, PullError> {
        let mut report = PullReport::default();
        self.replay(&mut report).await?;

        loop {
            let page = self.transport.pull(checkpoint, exclude_client).await?;
            report.pages += 1;

            for event in &page.events {
                match self.apply(event).await? {
                    Applied::Yes => report.applied += 1,
                    Applied::Skipped => report.skipped += 1,
                    Applied::Deferred => report.deferred += 1,
                }
            }

            self.state.set_last_pull(&page.server_time).await?;
            checkpoint = Some(page.server_time);

            if !page.has_more {
                break;
            }
            if report.pages >= MAX_PAGES {
                tracing::warn!("Pull stopped after {} pages; more remain", MAX_PAGES);
                break;
            }
        }

        tracing::info!(
            "Pull: {} applied, {} replayed, {} skipped, {} deferred over {} page(s)",
            report.applied,
            report.replayed,
            report.skipped,
            report.deferred,
            report.pages
        );
        Ok(report)
    }

    /// Applies held events whose record no longer has local changes.
    async fn replay(&self, report: &mut PullReport) -> Result<(), StoreError> {
        for event in self.store.deferred().await? {
            if let Some(id) = event.target_id() {
                if self.store.has_pending(id).await? {
                    continue;
                }
            }

            match self.write(&event).await? {
                Applied::Yes => report.replayed += 1,
                Applied::Skipped | Applied::Deferred => report.skipped += 1,
            }
            self.store.remove_deferred(&event.id).await?;
        }
        Ok(())
    }

    async fn apply(&self, event: &SyncEvent) -> Result<Applied, StoreError> {
        let Some((entity_type, _, id)) = interpret(event) else {
            return Ok(Applied::Skipped);
        };

        if self.store.has_pending(id).await? {
            tracing::debug!(
                "Deferring event {}: {} {} has local changes",
                event.id,
                entity_type,
                id
            );
            self.store.defer(event, id).await?;
            return Ok(Applied::Deferred);
        }

        self.write(event).await
    }

    /// Writes a remote event into the local store as confirmed state.
    async fn write(&self, event: &SyncEvent) -> Result<Applied, StoreError> {
        let Some((entity_type, action, id)) = interpret(event) else {
            return Ok(Applied::Skipped);
        };

        match action {
            Action::Create | Action::Update => {
                let payload = match event
                    .data
                    .clone()
                    .map(|data| EventPayload::decode(entity_type, data))
                {
                    Some(Ok(payload)) => payload,
                    Some(Err(e)) => {
                        tracing::warn!("Skipping event {}: invalid data: {}", event.id, e);
                        return Ok(Applied::Skipped);
                    }
                    None => {
                        tracing::warn!("Skipping event {}: no data", event.id);
                        return Ok(Applied::Skipped);
                    }
                };
                self.store
                    .put(entity_type, id, &payload.to_value()?, false)
                    .await?;
            }
            Action::Delete => {
                self.store.delete(entity_type, id).await?;
            }
            Action::Deactivate => {
                self.store.deactivate(entity_type, id).await?;
            }
        }

        Ok(Applied::Yes)
    }
}

/// The event's entity type, action and target id, or `None` if this client
/// cannot apply it.
fn interpret(event: &SyncEvent) -> Option<(EntityType, Action, &str)> {
    let (entity_type, action) = match (event.parsed_entity_type(), event.parsed_action()) {
        (Ok(entity_type), Ok(action)) if entity_type.supports(action) => (entity_type, action),
        _ => {
            tracing::debug!(
                "Skipping event {}: unknown {} {}",
                event.id,
                event.action,
                event.entity_type
            );
            return None;
        }
    };

    let Some(id) = event.target_id() else {
        tracing::warn!("Skipping event {}: no entity_id", event.id);
        return None;
    };

    Some((entity_type, action, id))
}
