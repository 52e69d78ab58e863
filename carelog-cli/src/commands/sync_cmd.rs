//! Sync CLI commands for synchronizing with the server.

use clap::{Args, Subcommand};
use std::sync::Arc;

use carelog_core::SyncError;

use crate::config::Config;
use crate::db::{init_db, LocalStore, StoreError, SyncState};
use crate::sync::{
    HttpTransport, PullError, PullReconciler, PushError, PushSynchronizer, SyncTransport,
    MAX_RETRIES,
};

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Push queued changes to the server
    Push,
    /// Pull changes made on other devices
    Pull {
        /// Forget the checkpoint and pull everything again
        #[arg(long)]
        full: bool,
    },
    /// Show sync configuration, local queue and server status
    Status,
    /// List changes waiting to be pushed
    Queue,
    /// Release events that exhausted their retries
    Retry {
        /// Event ID (all exhausted events if omitted)
        event_id: Option<String>,
    },
    /// Drop queued changes without pushing them
    Discard {
        /// Event ID
        event_id: Option<String>,

        /// Drop every queued change
        #[arg(long, conflicts_with = "event_id")]
        all: bool,
    },
}

/// Local database handles shared by the subcommands.
struct Session {
    store: LocalStore,
    state: SyncState,
}

impl Session {
    async fn open(config: &Config) -> Result<Self, SyncCommandError> {
        let pool = init_db(&config.database_path.value).await?;
        Ok(Self {
            store: LocalStore::new(pool.clone()),
            state: SyncState::new(pool),
        })
    }

    fn push(&self, transport: Arc<dyn SyncTransport>) -> PushSynchronizer {
        PushSynchronizer::new(self.store.clone(), self.state.clone(), transport)
    }

    fn pull(&self, transport: Arc<dyn SyncTransport>) -> PullReconciler {
        PullReconciler::new(self.store.clone(), self.state.clone(), transport)
    }
}

impl SyncCommand {
    pub fn run(&self, config: &Config) -> Result<(), SyncCommandError> {
        // Use tokio runtime for async operations
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| SyncCommandError::RuntimeError(e.to_string()))?;

        rt.block_on(async {
            let session = Session::open(config).await?;
            match &self.command {
                None => {
                    let transport = transport(config)?;
                    push(&session, transport.clone()).await?;
                    pull(&session, transport).await
                }
                Some(SyncSubcommand::Push) => push(&session, transport(config)?).await,
                Some(SyncSubcommand::Pull { full }) => {
                    pull_with(&session, transport(config)?, *full).await
                }
                Some(SyncSubcommand::Status) => status(&session, config).await,
                Some(SyncSubcommand::Queue) => queue(&session).await,
                Some(SyncSubcommand::Retry { event_id }) => {
                    retry(&session, event_id.as_deref()).await
                }
                Some(SyncSubcommand::Discard { event_id, all }) => {
                    discard(&session, event_id.as_deref(), *all).await
                }
            }
        })
    }
}

fn transport(config: &Config) -> Result<Arc<dyn SyncTransport>, SyncCommandError> {
    Ok(Arc::new(HttpTransport::from_config(&config.sync)?))
}

async fn push(session: &Session, transport: Arc<dyn SyncTransport>) -> Result<(), SyncCommandError> {
    let report = session.push(transport).run().await?;

    println!(
        "Pushed {} change{}",
        report.synced,
        if report.synced == 1 { "" } else { "s" }
    );
    if report.failed > 0 {
        println!("  ✗ {} failed", report.failed);
    }
    if report.deferred > 0 {
        println!("  … {} waiting on an earlier change", report.deferred);
    }
    if report.failed > 0 {
        println!("Run 'carelog sync queue' for details.");
    }

    Ok(())
}

async fn pull(session: &Session, transport: Arc<dyn SyncTransport>) -> Result<(), SyncCommandError> {
    pull_with(session, transport, false).await
}

async fn pull_with(
    session: &Session,
    transport: Arc<dyn SyncTransport>,
    full: bool,
) -> Result<(), SyncCommandError> {
    let reconciler = session.pull(transport);
    let report = if full {
        reconciler.run_full().await?
    } else {
        reconciler.run().await?
    };

    println!(
        "Pulled {} change{}",
        report.applied,
        if report.applied == 1 { "" } else { "s" }
    );
    if report.replayed > 0 {
        println!("  + {} applied after local changes cleared", report.replayed);
    }
    if report.deferred > 0 {
        println!("  … {} held back by local changes", report.deferred);
    }
    if report.skipped > 0 {
        println!("  - {} not understood by this client", report.skipped);
    }

    Ok(())
}

async fn status(session: &Session, config: &Config) -> Result<(), SyncCommandError> {
    println!("Sync Configuration");
    println!("==================");
    println!();

    let pending = session.store.queue().count().await?;
    let last_pull = session.state.last_pull().await?;

    println!("Queued changes: {}", pending);
    match last_pull {
        Some(t) => println!("Last pull:      {}", t.to_rfc3339()),
        None => println!("Last pull:      never"),
    }
    println!();

    let Some(server_url) = config.sync.server_url.as_ref() else {
        println!("Status: Not configured");
        println!();
        println!("To enable sync, add to your config file:");
        println!();
        println!("  sync:");
        println!("    server_url: \"http://localhost:8080\"");
        println!("    api_key: \"<your key>\"");
        println!();
        println!("Or set environment variables:");
        println!("  CARELOG_SYNC_URL, CARELOG_SYNC_API_KEY");
        return Ok(());
    };

    println!("Server:    {}", server_url);
    println!(
        "Auto-sync: {}",
        if config.sync.auto_sync {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();

    print!("Server status: ");
    let transport = match transport(config) {
        Ok(t) => t,
        Err(e) => {
            println!("✗ {}", e);
            return Ok(());
        }
    };
    let client_id = session.state.client_id().await?;
    match transport.status(last_pull, &client_id).await {
        Ok(remote) => {
            println!("✓ connected");
            println!("Remote changes waiting: {}", remote.pending);
        }
        Err(e) if e.is_transient() => println!("✗ unreachable ({})", e),
        Err(e) => println!("✗ error: {}", e),
    }

    Ok(())
}

async fn queue(session: &Session) -> Result<(), SyncCommandError> {
    let events = session.store.queue().list().await?;
    if events.is_empty() {
        println!("Nothing to push.");
        return Ok(());
    }

    for event in &events {
        let state = if event.retry_count >= MAX_RETRIES {
            "stuck".to_string()
        } else if event.retry_count > 0 {
            format!("retried {}x", event.retry_count)
        } else {
            "queued".to_string()
        };
        println!(
            "{}  {} {} {}  [{}]",
            event.id,
            event.action,
            event.entity_type,
            event.record_id,
            state
        );
    }

    if events.iter().any(|e| e.retry_count >= MAX_RETRIES) {
        println!();
        println!("Stuck changes are not retried; release them with 'carelog sync retry'.");
    }

    Ok(())
}

async fn retry(session: &Session, event_id: Option<&str>) -> Result<(), SyncCommandError> {
    if let Some(id) = event_id {
        if session.store.queue().get(id).await?.is_none() {
            return Err(SyncCommandError::UnknownEvent(id.to_string()));
        }
    }

    let released = session.store.queue().reset_retries(event_id).await?;
    println!(
        "Released {} event{}",
        released,
        if released == 1 { "" } else { "s" }
    );
    Ok(())
}

async fn discard(
    session: &Session,
    event_id: Option<&str>,
    all: bool,
) -> Result<(), SyncCommandError> {
    match (event_id, all) {
        (_, true) => {
            let dropped = session.store.discard_all().await?;
            println!(
                "Discarded {} event{}",
                dropped,
                if dropped == 1 { "" } else { "s" }
            );
        }
        (Some(id), false) => {
            let event = session
                .store
                .queue()
                .get(id)
                .await?
                .ok_or_else(|| SyncCommandError::UnknownEvent(id.to_string()))?;
            let dropped = session
                .store
                .discard(&event.id)
                .await?
                .ok_or_else(|| SyncCommandError::UnknownEvent(id.to_string()))?;
            println!(
                "Discarded {} {} {}",
                event.action, event.entity_type, event.record_id
            );
            if dropped > 1 {
                println!("  and {} later change(s) to the same entry", dropped - 1);
            }
        }
        (None, false) => {
            println!("Give an event ID or --all.");
            return Ok(());
        }
    }
    println!("Run 'carelog sync pull --full' to restore the server's version.");
    Ok(())
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    SyncError(SyncError),
    Push(PushError),
    Pull(PullError),
    Storage(StoreError),
    UnknownEvent(String),
    RuntimeError(String),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
            SyncCommandError::Push(e) => write!(f, "Push failed: {}", e),
            SyncCommandError::Pull(e) => write!(f, "Pull failed: {}", e),
            SyncCommandError::Storage(e) => write!(f, "{}", e),
            SyncCommandError::UnknownEvent(id) => write!(f, "No queued event {}", id),
            SyncCommandError::RuntimeError(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::SyncError(e) => Some(e),
            SyncCommandError::Push(e) => Some(e),
            SyncCommandError::Pull(e) => Some(e),
            SyncCommandError::Storage(e) => Some(e),
            SyncCommandError::UnknownEvent(_) | SyncCommandError::RuntimeError(_) => None,
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}

impl From<PushError> for SyncCommandError {
    fn from(e: PushError) -> Self {
        SyncCommandError::Push(e)
    }
}

impl From<PullError> for SyncCommandError {
    fn from(e: PullError) -> Self {
        SyncCommandError::Pull(e)
    }
}

impl From<StoreError> for SyncCommandError {
    fn from(e: StoreError) -> Self {
        SyncCommandError::Storage(e)
    }
}
