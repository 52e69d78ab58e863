//! Local SQLite database: record copies, the mutation queue and sync state.

mod queue;
mod state;
mod store;

pub use queue::{MutationQueue, QueuedEvent};
pub use state::SyncState;
pub use store::{LocalRecord, LocalStore};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(e.into()))?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Database(e.into()))?;

    Ok(pool)
}

/// Errors from the local database.
#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    /// Record or event JSON could not be encoded or decoded.
    Encoding(serde_json::Error),
    /// No local record with this id.
    NotFound(String),
    /// The entity type does not support the action.
    Unsupported(String),
    /// The request does not fit the action (missing id, mismatched payload).
    Invalid(String),
    /// A stored row could not be interpreted.
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Encoding(e) => write!(f, "Encoding error: {}", e),
            StoreError::NotFound(id) => write!(f, "Record not found: {}", id),
            StoreError::Unsupported(e) => write!(f, "Not supported: {}", e),
            StoreError::Invalid(e) => write!(f, "Invalid request: {}", e),
            StoreError::Corrupt(e) => write!(f, "Corrupt local data: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            StoreError::Encoding(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encoding(e)
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("stored time '{}': {}", value, e)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("nested").join("local.db"))
            .await
            .unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();

        for entity in carelog_core::EntityType::ALL {
            assert!(names.contains(&entity.table_name()));
        }
        for table in [
            "pending_events",
            "id_mappings",
            "sync_state",
            "deferred_events",
        ] {
            assert!(names.contains(&table));
        }
    }
}
