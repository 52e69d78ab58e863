//! Carelog Sync Server
//!
//! Applies events pushed by offline clients to the family's records and
//! serves them back to the family's other devices.
//!
//! # Configuration
//!
//! Environment variables:
//! - `CARELOG_PORT`: Port to listen on (default: 8080)
//! - `CARELOG_DATA_DIR`: Directory holding the database (default: ~/.local/share/carelog-server)
//! - `CARELOG_CONFIG`: Path to config file (default: ~/.config/carelog-server/config.yaml)
//! - `CARELOG_PULL_LIMIT`: Maximum events per pull page (default: 500)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "parent1"
//!     family_id: "family1"
//! ```

use carelog::config::Config;
use carelog::db::init_db;
use carelog::server::{router, ApiKeyStore, AppState, ChangeLog, Dispatcher, Services};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    tracing::error!("{}: {}", context, e);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carelog=info,carelog_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        fail("Failed to create data directory", e);
    }

    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let api_keys = Arc::new(ApiKeyStore::load(&config.config_path));

    let pool = match init_db(&config.database_path()).await {
        Ok(pool) => pool,
        Err(e) => fail("Failed to open database", e),
    };

    let state = AppState {
        api_keys,
        dispatcher: Arc::new(Dispatcher::new(Services::sqlite(pool.clone()))),
        changes: Arc::new(ChangeLog::new(pool)),
        pull_limit: i64::try_from(config.pull_limit).unwrap_or(i64::MAX),
    };

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => fail("Failed to bind", e),
    };
    if let Err(e) = axum::serve(listener, app).await {
        fail("Server error", e);
    }
}
