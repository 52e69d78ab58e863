use carelog_core::{checkpoint_string, generate_event_id, Action, EntityType, SyncEvent};
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;

use super::{parse_time, StoreError};

/// A mutation waiting to be pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub id: String,
    pub entity_type: EntityType,
    pub action: Action,
    /// Wire entity id; `None` for creates.
    pub entity_id: Option<String>,
    /// Local key of the record this event describes.
    pub record_id: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl QueuedEvent {
    /// Wire form of the event. `entity_id` is the id to send, already
    /// resolved against any server-assigned id.
    pub fn to_sync_event(&self, client_id: &str, entity_id: Option<String>) -> SyncEvent {
        let mut event = SyncEvent::new(self.id.clone(), self.entity_type, self.action)
            .with_timestamp(self.timestamp)
            .with_client_id(client_id);
        event.entity_id = entity_id;
        event.data = self.data.clone();
        event
    }
}

#[derive(sqlx::FromRow)]
struct QueuedEventRow {
    id: String,
    entity_type: String,
    action: String,
    entity_id: Option<String>,
    record_id: String,
    data: Option<String>,
    timestamp: String,
    retry_count: i64,
}

impl TryFrom<QueuedEventRow> for QueuedEvent {
    type Error = StoreError;

    fn try_from(row: QueuedEventRow) -> Result<Self, Self::Error> {
        let entity_type = EntityType::from_str(&row.entity_type)
            .map_err(|e| StoreError::Corrupt(format!("event {}: {}", row.id, e)))?;
        let action = Action::from_str(&row.action)
            .map_err(|e| StoreError::Corrupt(format!("event {}: {}", row.id, e)))?;
        let data = row
            .data
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;

        Ok(QueuedEvent {
            id: row.id,
            entity_type,
            action,
            entity_id: row.entity_id,
            record_id: row.record_id,
            data,
            timestamp: parse_time(&row.timestamp)?,
            retry_count: u32::try_from(row.retry_count).unwrap_or(u32::MAX),
        })
    }
}

/// Durable FIFO of local mutations awaiting push.
///
/// Events are immutable once enqueued; only `retry_count` changes.
#[derive(Clone)]
pub struct MutationQueue {
    pool: SqlitePool,
}

impl MutationQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends a mutation of the record `record_id`, inside the transaction
    /// that wrote the local record.
    pub async fn enqueue_in(
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        action: Action,
        record_id: &str,
        data: Option<Value>,
    ) -> Result<QueuedEvent, StoreError> {
        let event = QueuedEvent {
            id: generate_event_id(),
            entity_type,
            action,
            entity_id: action
                .requires_entity_id()
                .then(|| record_id.to_string()),
            record_id: record_id.to_string(),
            data,
            // Stored with microsecond precision
            timestamp: Utc::now().trunc_subsecs(6),
            retry_count: 0,
        };

        let data = event.data.as_ref().map(Value::to_string);
        sqlx::query(
            r#"
            INSERT INTO pending_events (id, entity_type, action, entity_id, record_id, data, timestamp, retry_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&event.id)
        .bind(event.entity_type.as_str())
        .bind(event.action.as_str())
        .bind(&event.entity_id)
        .bind(&event.record_id)
        .bind(data)
        .bind(checkpoint_string(&event.timestamp))
        .execute(&mut *conn)
        .await?;

        tracing::debug!(
            "Queued {} {} {} as {}",
            event.action,
            event.entity_type,
            event.record_id,
            event.id
        );

        Ok(event)
    }

    /// All queued events, oldest first.
    pub async fn list(&self) -> Result<Vec<QueuedEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::list_in(&mut conn).await
    }

    pub async fn list_in(conn: &mut SqliteConnection) -> Result<Vec<QueuedEvent>, StoreError> {
        let rows: Vec<QueuedEventRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, action, entity_id, record_id, data, timestamp, retry_count
            FROM pending_events
            ORDER BY rowid
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(QueuedEvent::try_from).collect()
    }

    pub async fn get(&self, event_id: &str) -> Result<Option<QueuedEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, event_id).await
    }

    pub async fn get_in(
        conn: &mut SqliteConnection,
        event_id: &str,
    ) -> Result<Option<QueuedEvent>, StoreError> {
        let row: Option<QueuedEventRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, action, entity_id, record_id, data, timestamp, retry_count
            FROM pending_events
            WHERE id = ?
            "#,
        )
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(QueuedEvent::try_from).transpose()
    }

    /// Removes an event. Removing an absent event is not an error.
    pub async fn remove_in(conn: &mut SqliteConnection, event_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_events WHERE id = ?")
            .bind(event_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Counts one more failed attempt. No-op for an absent event.
    pub async fn increment_retry(&self, event_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE pending_events SET retry_count = retry_count + 1 WHERE id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drops every queued event. Returns how many were removed.
    pub async fn clear_in(conn: &mut SqliteConnection) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM pending_events")
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM pending_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Resets the retry counter of one event, or of all events, so that
    /// exhausted events are submitted again.
    pub async fn reset_retries(&self, event_id: Option<&str>) -> Result<u64, StoreError> {
        let result = match event_id {
            Some(id) => {
                sqlx::query("UPDATE pending_events SET retry_count = 0 WHERE id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE pending_events SET retry_count = 0 WHERE retry_count > 0")
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }
}
