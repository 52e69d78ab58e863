use carelog_core::{checkpoint_string, generate_client_id};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use super::StoreError;

const CLIENT_ID: &str = "client_id";
const LAST_PULL: &str = "last_pull";
const PUSH_LEASE: &str = "push_lease";

/// Small key/value table for the device identity, the pull checkpoint and
/// the push lease.
#[derive(Clone)]
pub struct SyncState {
    pool: SqlitePool,
}

impl SyncState {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_state (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// This device's id, generated on first use.
    pub async fn client_id(&self) -> Result<String, StoreError> {
        if let Some(id) = self.get(CLIENT_ID).await? {
            return Ok(id);
        }

        let id = generate_client_id();
        sqlx::query("INSERT OR IGNORE INTO sync_state (key, value) VALUES (?, ?)")
            .bind(CLIENT_ID)
            .bind(&id)
            .execute(&self.pool)
            .await?;

        // Another process may have won the insert
        Ok(self.get(CLIENT_ID).await?.unwrap_or(id))
    }

    /// Checkpoint of the last applied pull page.
    pub async fn last_pull(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(raw) = self.get(LAST_PULL).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| StoreError::Corrupt(format!("pull checkpoint '{}': {}", raw, e)))
    }

    pub async fn set_last_pull(&self, checkpoint: &DateTime<Utc>) -> Result<(), StoreError> {
        self.set(LAST_PULL, &checkpoint_string(checkpoint)).await
    }

    /// Forgets the pull checkpoint so the next pull starts from the beginning.
    pub async fn reset_last_pull(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_state WHERE key = ?")
            .bind(LAST_PULL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Takes or renews the push lease for `holder` until `ttl` from now.
    ///
    /// Returns false while another holder's lease is unexpired. The lease is
    /// stored as `<expiry>|<holder>` and taken in a single conditional upsert,
    /// so concurrent processes sharing the database cannot both win.
    pub async fn acquire_push_lease(&self, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Utc::now();
        let value = format!("{}|{}", checkpoint_string(&(now + ttl)), holder);

        let result = sqlx::query(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            WHERE substr(sync_state.value, 1, instr(sync_state.value, '|') - 1) < ?
               OR substr(sync_state.value, instr(sync_state.value, '|') + 1) = ?
            "#,
        )
        .bind(PUSH_LEASE)
        .bind(&value)
        .bind(checkpoint_string(&now))
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Gives up the push lease if `holder` still owns it.
    pub async fn release_push_lease(&self, holder: &str) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM sync_state WHERE key = ? AND substr(value, instr(value, '|') + 1) = ?",
        )
        .bind(PUSH_LEASE)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[tokio::test]
    async fn test_client_id_is_stable() {
        let db = test_db().await;
        let state = SyncState::new(db.pool.clone());

        let first = state.client_id().await.unwrap();
        let second = state.client_id().await.unwrap();

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_last_pull_round_trip() {
        let db = test_db().await;
        let state = SyncState::new(db.pool.clone());
        assert!(state.last_pull().await.unwrap().is_none());

        let checkpoint = DateTime::parse_from_rfc3339("2025-03-01T06:30:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        state.set_last_pull(&checkpoint).await.unwrap();
        assert_eq!(state.last_pull().await.unwrap(), Some(checkpoint));

        state.reset_last_pull().await.unwrap();
        assert!(state.last_pull().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_lease_excludes_other_holders() {
        let db = test_db().await;
        let first = SyncState::new(db.pool.clone());
        let second = SyncState::new(db.pool.clone());
        let ttl = Duration::minutes(5);

        assert!(first.acquire_push_lease("run-a", ttl).await.unwrap());
        assert!(!second.acquire_push_lease("run-b", ttl).await.unwrap());

        // Renewal by the holder
        assert!(first.acquire_push_lease("run-a", ttl).await.unwrap());

        // Only the holder can release
        second.release_push_lease("run-b").await.unwrap();
        assert!(!second.acquire_push_lease("run-b", ttl).await.unwrap());

        first.release_push_lease("run-a").await.unwrap();
        assert!(second.acquire_push_lease("run-b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_push_lease_is_taken_over() {
        let db = test_db().await;
        let state = SyncState::new(db.pool.clone());

        assert!(state
            .acquire_push_lease("crashed", Duration::seconds(-1))
            .await
            .unwrap());
        assert!(state
            .acquire_push_lease("run-b", Duration::minutes(5))
            .await
            .unwrap());
        assert!(!state
            .acquire_push_lease("crashed", Duration::minutes(5))
            .await
            .unwrap());
    }
}
