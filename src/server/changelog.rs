//! Per-family log of applied events.
//!
//! Every event the dispatcher applies is recorded here with a server-assigned
//! `recorded_at`. Pull pages through this log; push consults it to answer
//! events that were already applied in an earlier request.

use carelog_core::{checkpoint_string, SyncEvent};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// One page of changes.
#[derive(Debug, Clone)]
pub struct ChangePage {
    pub events: Vec<SyncEvent>,
    /// `recorded_at` of the last event on the page.
    pub last_recorded: Option<DateTime<Utc>>,
    pub has_more: bool,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: String,
    entity_type: String,
    action: String,
    entity_id: Option<String>,
    data: Option<String>,
    timestamp: String,
    client_id: Option<String>,
    recorded_at: String,
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(format!("stored time '{}': {}", value, e).into()))
}

impl EventRow {
    fn into_event(self) -> Result<(SyncEvent, DateTime<Utc>), sqlx::Error> {
        let data = self
            .data
            .map(|raw| serde_json::from_str::<Value>(&raw))
            .transpose()
            .map_err(|e| sqlx::Error::Decode(format!("event {} data: {}", self.event_id, e).into()))?;
        let recorded_at = parse_time(&self.recorded_at)?;
        let event = SyncEvent {
            timestamp: parse_time(&self.timestamp)?,
            id: self.event_id,
            entity_type: self.entity_type,
            action: self.action,
            entity_id: self.entity_id,
            data,
            client_id: self.client_id,
        };
        Ok((event, recorded_at))
    }
}

pub struct ChangeLog {
    pool: SqlitePool,
    /// Last assigned `recorded_at`; also serializes writers.
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ChangeLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            last: Mutex::new(None),
        }
    }

    /// Records an applied event and returns its `recorded_at`.
    ///
    /// `entity_id` is the entity the event touched; for creates this is the
    /// server-assigned id, so pulled creates carry it.
    pub async fn record(
        &self,
        family_id: &str,
        client_id: &str,
        event: &SyncEvent,
        entity_id: &str,
    ) -> Result<DateTime<Utc>, sqlx::Error> {
        let mut last = self.last.lock().await;

        if last.is_none() {
            let stored: Option<String> =
                sqlx::query_scalar("SELECT MAX(recorded_at) FROM sync_events")
                    .fetch_one(&self.pool)
                    .await?;
            *last = stored.as_deref().map(parse_time).transpose()?;
        }

        let now = Utc::now().trunc_subsecs(6);
        let recorded_at = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };

        let data = event.data.as_ref().map(Value::to_string);
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO sync_events
                (event_id, family_id, entity_type, action, entity_id, data, timestamp, client_id, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(family_id)
        .bind(&event.entity_type)
        .bind(&event.action)
        .bind(entity_id)
        .bind(data)
        .bind(checkpoint_string(&event.timestamp))
        .bind(client_id)
        .bind(checkpoint_string(&recorded_at))
        .execute(&self.pool)
        .await?;

        *last = Some(recorded_at);
        Ok(recorded_at)
    }

    /// Looks up which of `event_ids` were already applied for the family.
    ///
    /// Returns event id -> entity id.
    pub async fn applied(
        &self,
        family_id: &str,
        event_ids: &[String],
    ) -> Result<HashMap<String, String>, sqlx::Error> {
        if event_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT event_id, entity_id FROM sync_events WHERE family_id = ");
        query.push_bind(family_id);
        query.push(" AND event_id IN (");
        let mut ids = query.separated(", ");
        for id in event_ids {
            ids.push_bind(id);
        }
        ids.push_unseparated(")");

        let rows: Vec<(String, Option<String>)> =
            query.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(event_id, entity_id)| (event_id, entity_id.unwrap_or_default()))
            .collect())
    }

    /// Events recorded for the family after `since`, oldest first.
    ///
    /// Events submitted by `exclude_client` are left out.
    pub async fn since(
        &self,
        family_id: &str,
        since: Option<DateTime<Utc>>,
        exclude_client: Option<&str>,
        limit: i64,
    ) -> Result<ChangePage, sqlx::Error> {
        let since = since.map(|t| checkpoint_string(&t)).unwrap_or_default();

        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, entity_type, action, entity_id, data, timestamp, client_id, recorded_at
            FROM sync_events
            WHERE family_id = ? AND recorded_at > ?
              AND (? IS NULL OR client_id IS NULL OR client_id != ?)
            ORDER BY recorded_at, seq
            LIMIT ?
            "#,
        )
        .bind(family_id)
        .bind(&since)
        .bind(exclude_client)
        .bind(exclude_client)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() as i64 > limit;
        let mut events = Vec::with_capacity(rows.len());
        let mut last_recorded = None;
        for row in rows.into_iter().take(limit.max(0) as usize) {
            let (event, recorded_at) = row.into_event()?;
            last_recorded = Some(recorded_at);
            events.push(event);
        }

        Ok(ChangePage {
            events,
            last_recorded,
            has_more,
        })
    }

    /// Checkpoint string of the newest event recorded for the family.
    pub async fn latest(&self, family_id: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT MAX(recorded_at) FROM sync_events WHERE family_id = ?")
            .bind(family_id)
            .fetch_one(&self.pool)
            .await
    }

    /// Number of events a pull from `since` would return.
    pub async fn count_since(
        &self,
        family_id: &str,
        since: Option<DateTime<Utc>>,
        exclude_client: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let since = since.map(|t| checkpoint_string(&t)).unwrap_or_default();

        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sync_events
            WHERE family_id = ? AND recorded_at > ?
              AND (? IS NULL OR client_id IS NULL OR client_id != ?)
            "#,
        )
        .bind(family_id)
        .bind(&since)
        .bind(exclude_client)
        .bind(exclude_client)
        .fetch_one(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use carelog_core::{Action, EntityType};
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        log: ChangeLog,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        TestContext {
            log: ChangeLog::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn create(id: &str) -> SyncEvent {
        SyncEvent::new(id, EntityType::Note, Action::Create)
            .with_data(json!({ "child_id": "c1", "content": id }))
    }

    #[tokio::test]
    async fn test_recorded_at_strictly_increases() {
        let ctx = setup().await;

        let mut previous = None;
        for i in 0..20 {
            let at = ctx
                .log
                .record("family1", "client-a", &create(&format!("e{}", i)), "n")
                .await
                .unwrap();
            if let Some(prev) = previous {
                assert!(at > prev);
            }
            previous = Some(at);
        }
    }

    #[tokio::test]
    async fn test_since_pages_in_order() {
        let ctx = setup().await;
        for id in ["e1", "e2", "e3"] {
            ctx.log
                .record("family1", "client-a", &create(id), &format!("n-{}", id))
                .await
                .unwrap();
        }

        let first = ctx.log.since("family1", None, None, 2).await.unwrap();
        assert!(first.has_more);
        let ids: Vec<_> = first.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
        assert_eq!(first.events[0].entity_id.as_deref(), Some("n-e1"));

        let second = ctx
            .log
            .since("family1", first.last_recorded, None, 2)
            .await
            .unwrap();
        assert!(!second.has_more);
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].id, "e3");
        assert_eq!(second.events[0].data, Some(json!({ "child_id": "c1", "content": "e3" })));
    }

    #[tokio::test]
    async fn test_since_excludes_client_and_family() {
        let ctx = setup().await;
        ctx.log.record("family1", "client-a", &create("a"), "n1").await.unwrap();
        ctx.log.record("family1", "client-b", &create("b"), "n2").await.unwrap();
        ctx.log.record("family2", "client-c", &create("c"), "n3").await.unwrap();

        let page = ctx
            .log
            .since("family1", None, Some("client-a"), 100)
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].id, "b");

        assert_eq!(
            ctx.log.count_since("family1", None, None).await.unwrap(),
            2
        );
        assert_eq!(
            ctx.log
                .count_since("family1", None, Some("client-b"))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_applied_lookup() {
        let ctx = setup().await;
        ctx.log.record("family1", "client-a", &create("e1"), "n1").await.unwrap();

        let found = ctx
            .log
            .applied("family1", &["e1".to_string(), "e2".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("e1").map(String::as_str), Some("n1"));

        let other_family = ctx
            .log
            .applied("family2", &["e1".to_string()])
            .await
            .unwrap();
        assert!(other_family.is_empty());
    }

    #[tokio::test]
    async fn test_latest() {
        let ctx = setup().await;
        assert!(ctx.log.latest("family1").await.unwrap().is_none());

        let at = ctx.log.record("family1", "client-a", &create("e1"), "n1").await.unwrap();
        assert_eq!(
            ctx.log.latest("family1").await.unwrap(),
            Some(checkpoint_string(&at))
        );
    }

    #[tokio::test]
    async fn test_corrupt_row_is_an_error() {
        let ctx = setup().await;
        ctx.log.record("family1", "client-a", &create("e1"), "n1").await.unwrap();

        sqlx::query("UPDATE sync_events SET timestamp = 'garbage' WHERE event_id = 'e1'")
            .execute(&ctx.log.pool)
            .await
            .unwrap();

        let result = ctx.log.since("family1", None, None, 10).await;
        assert!(matches!(result, Err(sqlx::Error::Decode(_))));
    }
}
