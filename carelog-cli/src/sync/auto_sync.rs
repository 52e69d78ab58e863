//! Auto-sync after write commands.
//!
//! When `auto_sync` is enabled, every write command pushes the queue and pulls
//! remote changes. Failures are reported on stderr and never fail the command;
//! the write is already queued and goes out with a later sync.

use std::sync::Arc;

use crate::config::Config;
use crate::db::{init_db, LocalStore, SyncState};
use crate::sync::{check_server, HttpTransport, PullReconciler, PushSynchronizer};

/// Performs auto-sync if enabled and the server is reachable.
pub fn try_auto_sync(config: &Config) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(_) => return,
    };

    rt.block_on(async {
        let url = match config.sync.server_url.as_ref() {
            Some(url) => url,
            None => return,
        };

        // Check server reachability first (fast fail)
        if !check_server(url).await {
            eprintln!("Auto-sync: server unreachable, skipping");
            return;
        }

        let transport = match HttpTransport::from_config(&config.sync) {
            Ok(t) => Arc::new(t),
            Err(_) => return,
        };
        let pool = match init_db(&config.database_path.value).await {
            Ok(pool) => pool,
            Err(e) => {
                eprintln!("Auto-sync: {}", e);
                return;
            }
        };

        let store = LocalStore::new(pool.clone());
        let state = SyncState::new(pool);

        let push = PushSynchronizer::new(store.clone(), state.clone(), transport.clone());
        match push.run().await {
            Ok(report) if report.failed > 0 => {
                eprintln!(
                    "Auto-sync: {} event(s) could not be pushed, see `carelog sync queue`",
                    report.failed
                );
            }
            Ok(_) => {}
            Err(e) => eprintln!("Auto-sync: {}", e),
        }

        if let Err(e) = PullReconciler::new(store, state, transport).run().await {
            eprintln!("Auto-sync: {}", e);
        }
    });
}
