use carelog_core::{checkpoint_string, Action, EntityType, EventPayload, SyncEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::queue::{MutationQueue, QueuedEvent};
use super::{parse_time, StoreError};

/// A local copy of a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalRecord {
    pub id: String,
    pub data: Value,
    /// Local changes not yet confirmed by the server.
    pub pending_sync: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LocalRecordRow {
    id: String,
    data: String,
    pending_sync: bool,
    synced_at: Option<String>,
    updated_at: String,
}

impl TryFrom<LocalRecordRow> for LocalRecord {
    type Error = StoreError;

    fn try_from(row: LocalRecordRow) -> Result<Self, Self::Error> {
        Ok(LocalRecord {
            data: serde_json::from_str(&row.data)?,
            id: row.id,
            pending_sync: row.pending_sync,
            synced_at: row.synced_at.as_deref().map(parse_time).transpose()?,
            updated_at: parse_time(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeferredRow {
    id: String,
    entity_type: String,
    action: String,
    entity_id: String,
    data: Option<String>,
    timestamp: String,
}

impl TryFrom<DeferredRow> for SyncEvent {
    type Error = StoreError;

    fn try_from(row: DeferredRow) -> Result<Self, Self::Error> {
        Ok(SyncEvent {
            data: row
                .data
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()?,
            timestamp: parse_time(&row.timestamp)?,
            id: row.id,
            entity_type: row.entity_type,
            action: row.action,
            entity_id: Some(row.entity_id),
            client_id: None,
        })
    }
}

/// Marks a stored medication as inactive.
fn deactivated(data: &str) -> Result<String, StoreError> {
    let mut value: Value = serde_json::from_str(data)?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| StoreError::Corrupt("record data is not an object".to_string()))?;
    fields.insert("active".to_string(), Value::Bool(false));
    Ok(value.to_string())
}

/// Resolves a placeholder id to the server-assigned id, if one is known.
async fn resolve_in(conn: &mut SqliteConnection, id: &str) -> Result<String, StoreError> {
    let server_id: Option<String> =
        sqlx::query_scalar("SELECT server_id FROM id_mappings WHERE local_id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(server_id.unwrap_or_else(|| id.to_string()))
}

/// `(entity type, field)` pairs whose data can point at a `target` record.
fn referencing(target: EntityType) -> impl Iterator<Item = (EntityType, &'static str)> {
    EntityType::ALL.into_iter().flat_map(move |source| {
        source
            .references()
            .iter()
            .filter(move |(_, points_at)| *points_at == target)
            .map(move |(field, _)| (source, *field))
    })
}

/// Number of queued events for a record, under its current or placeholder id.
async fn pending_count(conn: &mut SqliteConnection, id: &str) -> Result<i64, StoreError> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM pending_events
        WHERE record_id = ?
           OR record_id IN (SELECT local_id FROM id_mappings WHERE server_id = ?)
        "#,
    )
    .bind(id)
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Local record tables plus the bookkeeping that ties them to the queue.
///
/// Every local change is written together with its queued event, and every
/// confirmation clears the event together with the record's pending flag.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn queue(&self) -> MutationQueue {
        MutationQueue::new(self.pool.clone())
    }

    /// Applies a user change locally and queues it for push, atomically.
    ///
    /// Creates get a fresh placeholder id. Deletes remove the record right
    /// away. Returns the queued event; its `record_id` is the record's key.
    pub async fn apply_local(
        &self,
        entity_type: EntityType,
        action: Action,
        id: Option<&str>,
        payload: Option<EventPayload>,
    ) -> Result<QueuedEvent, StoreError> {
        if !entity_type.supports(action) {
            return Err(StoreError::Unsupported(format!(
                "{} cannot be {}d",
                entity_type, action
            )));
        }

        let data = match (action.carries_payload(), payload) {
            (true, Some(payload)) => {
                if payload.entity_type() != entity_type {
                    return Err(StoreError::Invalid(format!(
                        "{} data given for a {}",
                        payload.entity_type(),
                        entity_type
                    )));
                }
                Some(payload.to_value()?)
            }
            (true, None) => return Err(StoreError::Invalid(format!("{} requires data", action))),
            (false, Some(_)) => {
                return Err(StoreError::Invalid(format!("{} takes no data", action)))
            }
            (false, None) => None,
        };

        let table = entity_type.table_name();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let record_id = match (action, id) {
            (Action::Create, Some(_)) => {
                return Err(StoreError::Invalid(
                    "create assigns its own id".to_string(),
                ))
            }
            (Action::Create, None) => {
                let id = Uuid::new_v4().to_string();
                let sql = format!(
                    "INSERT INTO {} (id, data, pending_sync, synced_at, updated_at) VALUES (?, ?, 1, NULL, ?)",
                    table
                );
                sqlx::query(&sql)
                    .bind(&id)
                    .bind(data.as_ref().map(Value::to_string))
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;
                id
            }
            (_, None) => return Err(StoreError::Invalid(format!("{} requires an id", action))),
            (Action::Update, Some(id)) => {
                let id = resolve_in(&mut tx, id).await?;
                let sql = format!(
                    "UPDATE {} SET data = ?, pending_sync = 1, updated_at = ? WHERE id = ?",
                    table
                );
                let result = sqlx::query(&sql)
                    .bind(data.as_ref().map(Value::to_string))
                    .bind(&now)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::NotFound(id));
                }
                id
            }
            (Action::Delete, Some(id)) => {
                let id = resolve_in(&mut tx, id).await?;
                let sql = format!("DELETE FROM {} WHERE id = ?", table);
                let result = sqlx::query(&sql).bind(&id).execute(&mut *tx).await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::NotFound(id));
                }
                id
            }
            (Action::Deactivate, Some(id)) => {
                let id = resolve_in(&mut tx, id).await?;
                let sql = format!("SELECT data FROM {} WHERE id = ?", table);
                let stored: Option<String> = sqlx::query_scalar(&sql)
                    .bind(&id)
                    .fetch_optional(&mut *tx)
                    .await?;
                let stored = stored.ok_or_else(|| StoreError::NotFound(id.clone()))?;

                let sql = format!(
                    "UPDATE {} SET data = ?, pending_sync = 1, updated_at = ? WHERE id = ?",
                    table
                );
                sqlx::query(&sql)
                    .bind(deactivated(&stored)?)
                    .bind(&now)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                id
            }
        };

        let event = MutationQueue::enqueue_in(&mut tx, entity_type, action, &record_id, data).await?;
        tx.commit().await?;

        Ok(event)
    }

    /// Records a server confirmation of `event`, atomically.
    ///
    /// For a create, the record is re-keyed to `assigned_id`, the mapping kept
    /// for events still queued under the placeholder, and local records that
    /// reference the placeholder are pointed at the new id. The event leaves
    /// the queue and the record stays pending only if other events for it
    /// remain. Returns the record's current key.
    pub async fn confirm(
        &self,
        event: &QueuedEvent,
        assigned_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let table = event.entity_type.table_name();
        let mut tx = self.pool.begin().await?;

        let key = match (event.action, assigned_id) {
            (Action::Create, Some(server_id)) if server_id != event.record_id => {
                let sql = format!("UPDATE OR REPLACE {} SET id = ? WHERE id = ?", table);
                sqlx::query(&sql)
                    .bind(server_id)
                    .bind(&event.record_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "INSERT OR REPLACE INTO id_mappings (local_id, server_id, entity_type) VALUES (?, ?, ?)",
                )
                .bind(&event.record_id)
                .bind(server_id)
                .bind(event.entity_type.as_str())
                .execute(&mut *tx)
                .await?;

                for (source, field) in referencing(event.entity_type) {
                    let path = format!("$.{}", field);
                    let sql = format!(
                        "UPDATE {} SET data = json_set(data, ?, ?) WHERE json_extract(data, ?) = ?",
                        source.table_name()
                    );
                    sqlx::query(&sql)
                        .bind(&path)
                        .bind(server_id)
                        .bind(&path)
                        .bind(&event.record_id)
                        .execute(&mut *tx)
                        .await?;
                }
                server_id.to_string()
            }
            _ => resolve_in(&mut tx, &event.record_id).await?,
        };

        MutationQueue::remove_in(&mut tx, &event.id).await?;
        let still_pending = pending_count(&mut tx, &key).await? > 0;

        // The server applied this event after any remote change held back for
        // the record, so those are superseded.
        sqlx::query("DELETE FROM deferred_events WHERE entity_id = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "UPDATE {} SET pending_sync = ?, synced_at = ? WHERE id = ?",
            table
        );
        sqlx::query(&sql)
            .bind(still_pending)
            .bind(Utc::now().to_rfc3339())
            .bind(&key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(key)
    }

    /// Drops one queued event without pushing it, atomically.
    ///
    /// A queued create was never confirmed, so discarding it removes the
    /// record and every later event queued for it. Otherwise the record keeps
    /// its local data and stays pending only while other events remain.
    /// Returns the number of events dropped, or `None` if no such event is
    /// queued.
    pub async fn discard(&self, event_id: &str) -> Result<Option<u64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(event) = MutationQueue::get_in(&mut tx, event_id).await? else {
            return Ok(None);
        };
        let table = event.entity_type.table_name();

        let dropped = if event.action == Action::Create {
            let result = sqlx::query("DELETE FROM pending_events WHERE record_id = ?")
                .bind(&event.record_id)
                .execute(&mut *tx)
                .await?;
            let sql = format!("DELETE FROM {} WHERE id = ?", table);
            sqlx::query(&sql)
                .bind(&event.record_id)
                .execute(&mut *tx)
                .await?;
            result.rows_affected()
        } else {
            MutationQueue::remove_in(&mut tx, &event.id).await?;
            let key = resolve_in(&mut tx, &event.record_id).await?;
            let still_pending = pending_count(&mut tx, &key).await? > 0;
            let sql = format!("UPDATE {} SET pending_sync = ? WHERE id = ?", table);
            sqlx::query(&sql)
                .bind(still_pending)
                .bind(&key)
                .execute(&mut *tx)
                .await?;
            1
        };

        tx.commit().await?;
        Ok(Some(dropped))
    }

    /// Drops the whole queue, atomically. Records created locally and never
    /// confirmed are removed; every other record is no longer pending.
    pub async fn discard_all(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        for event in MutationQueue::list_in(&mut tx).await? {
            if event.action == Action::Create {
                let sql = format!("DELETE FROM {} WHERE id = ?", event.entity_type.table_name());
                sqlx::query(&sql)
                    .bind(&event.record_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        let dropped = MutationQueue::clear_in(&mut tx).await?;

        for entity_type in EntityType::ALL {
            let sql = format!(
                "UPDATE {} SET pending_sync = 0 WHERE pending_sync = 1",
                entity_type.table_name()
            );
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(dropped)
    }

    /// Holds back a pulled event for `entity_id` until its local changes are
    /// confirmed or discarded. Holding the same event twice is a no-op.
    pub async fn defer(&self, event: &SyncEvent, entity_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO deferred_events (id, entity_type, action, entity_id, data, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.entity_type)
        .bind(&event.action)
        .bind(entity_id)
        .bind(event.data.as_ref().map(Value::to_string))
        .bind(checkpoint_string(&event.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Held-back events, in the order they were pulled.
    pub async fn deferred(&self) -> Result<Vec<SyncEvent>, StoreError> {
        let rows: Vec<DeferredRow> = sqlx::query_as(
            "SELECT id, entity_type, action, entity_id, data, timestamp FROM deferred_events ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SyncEvent::try_from).collect()
    }

    pub async fn remove_deferred(&self, event_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM deferred_events WHERE id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Server id assigned to a locally created record, if confirmed.
    pub async fn resolve(&self, local_id: &str) -> Result<Option<String>, StoreError> {
        let server_id = sqlx::query_scalar("SELECT server_id FROM id_mappings WHERE local_id = ?")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(server_id)
    }

    /// Whether any queued event still describes the record.
    pub async fn has_pending(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(pending_count(&mut conn, id).await? > 0)
    }

    /// Inserts or replaces a record with server state.
    pub async fn put(
        &self,
        entity_type: EntityType,
        id: &str,
        data: &Value,
        pending: bool,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let synced_at = (!pending).then(|| now.clone());
        let sql = format!(
            r#"
            INSERT INTO {} (id, data, pending_sync, synced_at, updated_at) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                pending_sync = excluded.pending_sync,
                synced_at = excluded.synced_at,
                updated_at = excluded.updated_at
            "#,
            entity_type.table_name()
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(data.to_string())
            .bind(pending)
            .bind(synced_at)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<LocalRecord>, StoreError> {
        let sql = format!(
            "SELECT id, data, pending_sync, synced_at, updated_at FROM {} WHERE id = ?",
            entity_type.table_name()
        );
        let row: Option<LocalRecordRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LocalRecord::try_from).transpose()
    }

    pub async fn list(&self, entity_type: EntityType) -> Result<Vec<LocalRecord>, StoreError> {
        let sql = format!(
            "SELECT id, data, pending_sync, synced_at, updated_at FROM {} ORDER BY updated_at, id",
            entity_type.table_name()
        );
        let rows: Vec<LocalRecordRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(LocalRecord::try_from).collect()
    }

    /// Removes a record. Returns false if it was already gone.
    pub async fn delete(&self, entity_type: EntityType, id: &str) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", entity_type.table_name());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Marks a record inactive as confirmed server state. Returns false if
    /// the record is not stored locally.
    pub async fn deactivate(&self, entity_type: EntityType, id: &str) -> Result<bool, StoreError> {
        let Some(record) = self.get(entity_type, id).await? else {
            return Ok(false);
        };
        let data = deactivated(&record.data.to_string())?;
        let value: Value = serde_json::from_str(&data)?;
        self.put(entity_type, id, &value, false).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;
    use carelog_core::{FeedingInput, FeedingType, MedicationInput, MedicationLogInput, NoteInput};
    use serde_json::json;

    fn feeding() -> EventPayload {
        let start = DateTime::parse_from_rfc3339("2025-03-01T06:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        EventPayload::Feeding(FeedingInput::new("child-1", FeedingType::Breast, start))
    }

    #[tokio::test]
    async fn test_create_writes_record_and_event() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());

        let event = store
            .apply_local(EntityType::Feeding, Action::Create, None, Some(feeding()))
            .await
            .unwrap();

        let record = store
            .get(EntityType::Feeding, &event.record_id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.pending_sync);
        assert!(record.synced_at.is_none());
        assert_eq!(record.data["child_id"], "child-1");

        let queued = store.queue().list().await.unwrap();
        assert_eq!(queued, vec![event.clone()]);
        assert!(event.entity_id.is_none());
    }

    #[tokio::test]
    async fn test_rejected_change_writes_nothing() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());

        let wrong_type = store
            .apply_local(EntityType::Note, Action::Create, None, Some(feeding()))
            .await;
        assert!(matches!(wrong_type, Err(StoreError::Invalid(_))));

        let missing = store
            .apply_local(EntityType::Feeding, Action::Update, Some("nope"), Some(feeding()))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        let log_update = store
            .apply_local(
                EntityType::MedicationLog,
                Action::Update,
                Some("x"),
                Some(EventPayload::MedicationLog(MedicationLogInput::new(
                    "m1",
                    Utc::now(),
                ))),
            )
            .await;
        assert!(matches!(log_update, Err(StoreError::Unsupported(_))));

        assert_eq!(store.queue().count().await.unwrap(), 0);
        assert!(store.list(EntityType::Note).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_optimistic() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        store
            .put(EntityType::Note, "note-1", &json!({ "child_id": "c", "content": "x", "tags": [] }), false)
            .await
            .unwrap();

        let event = store
            .apply_local(EntityType::Note, Action::Delete, Some("note-1"), None)
            .await
            .unwrap();

        assert!(store.get(EntityType::Note, "note-1").await.unwrap().is_none());
        assert_eq!(event.entity_id.as_deref(), Some("note-1"));
        assert_eq!(store.queue().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_medication() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        let create = store
            .apply_local(
                EntityType::Medication,
                Action::Create,
                None,
                Some(EventPayload::Medication(MedicationInput::new(
                    "child-1", "Ibuprofen", "2.5 ml",
                ))),
            )
            .await
            .unwrap();

        store
            .apply_local(
                EntityType::Medication,
                Action::Deactivate,
                Some(&create.record_id),
                None,
            )
            .await
            .unwrap();

        let record = store
            .get(EntityType::Medication, &create.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.data["active"], false);
        assert_eq!(store.queue().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_confirm_create_rekeys_and_maps() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        let create = store
            .apply_local(EntityType::Feeding, Action::Create, None, Some(feeding()))
            .await
            .unwrap();
        let update = store
            .apply_local(
                EntityType::Feeding,
                Action::Update,
                Some(&create.record_id),
                Some(feeding()),
            )
            .await
            .unwrap();

        let key = store.confirm(&create, Some("server-1")).await.unwrap();
        assert_eq!(key, "server-1");
        assert!(store.get(EntityType::Feeding, &create.record_id).await.unwrap().is_none());
        assert_eq!(
            store.resolve(&create.record_id).await.unwrap().as_deref(),
            Some("server-1")
        );

        // The queued update still describes the record
        let record = store.get(EntityType::Feeding, "server-1").await.unwrap().unwrap();
        assert!(record.pending_sync);
        assert!(store.has_pending("server-1").await.unwrap());

        let key = store.confirm(&update, None).await.unwrap();
        assert_eq!(key, "server-1");
        let record = store.get(EntityType::Feeding, "server-1").await.unwrap().unwrap();
        assert!(!record.pending_sync);
        assert!(record.synced_at.is_some());
        assert_eq!(store.queue().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_after_confirm_uses_server_id() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        let create = store
            .apply_local(
                EntityType::Note,
                Action::Create,
                None,
                Some(EventPayload::Note(NoteInput::new("child-1", "Sat up"))),
            )
            .await
            .unwrap();
        store.confirm(&create, Some("note-9")).await.unwrap();

        // Old placeholder still accepted
        let update = store
            .apply_local(
                EntityType::Note,
                Action::Update,
                Some(&create.record_id),
                Some(EventPayload::Note(NoteInput::new("child-1", "Sat up alone"))),
            )
            .await
            .unwrap();

        assert_eq!(update.record_id, "note-9");
        assert_eq!(update.entity_id.as_deref(), Some("note-9"));
    }

    #[tokio::test]
    async fn test_put_delete_and_deactivate_from_server() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        let data = json!({ "child_id": "c", "name": "Vitamin D", "dosage": "1 drop", "active": true });

        store.put(EntityType::Medication, "m1", &data, false).await.unwrap();
        store.put(EntityType::Medication, "m1", &data, false).await.unwrap();
        assert_eq!(store.list(EntityType::Medication).await.unwrap().len(), 1);

        assert!(store.deactivate(EntityType::Medication, "m1").await.unwrap());
        let record = store.get(EntityType::Medication, "m1").await.unwrap().unwrap();
        assert_eq!(record.data["active"], false);
        assert!(!record.pending_sync);

        assert!(store.delete(EntityType::Medication, "m1").await.unwrap());
        assert!(!store.delete(EntityType::Medication, "m1").await.unwrap());
        assert!(!store.deactivate(EntityType::Medication, "m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_confirm_points_references_at_server_id() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        let medication = store
            .apply_local(
                EntityType::Medication,
                Action::Create,
                None,
                Some(EventPayload::Medication(MedicationInput::new(
                    "child-1", "Paracetamol", "4 ml",
                ))),
            )
            .await
            .unwrap();
        let log = store
            .apply_local(
                EntityType::MedicationLog,
                Action::Create,
                None,
                Some(EventPayload::MedicationLog(MedicationLogInput::new(
                    medication.record_id.clone(),
                    Utc::now(),
                ))),
            )
            .await
            .unwrap();

        store.confirm(&medication, Some("med-7")).await.unwrap();

        let record = store
            .get(EntityType::MedicationLog, &log.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.data["medication_id"], "med-7");
        assert!(record.pending_sync);
    }

    #[tokio::test]
    async fn test_discard_create_removes_local_record() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        let create = store
            .apply_local(
                EntityType::Note,
                Action::Create,
                None,
                Some(EventPayload::Note(NoteInput::new("child-1", "draft"))),
            )
            .await
            .unwrap();
        store
            .apply_local(
                EntityType::Note,
                Action::Update,
                Some(&create.record_id),
                Some(EventPayload::Note(NoteInput::new("child-1", "draft 2"))),
            )
            .await
            .unwrap();

        assert_eq!(store.discard(&create.id).await.unwrap(), Some(2));

        assert_eq!(store.queue().count().await.unwrap(), 0);
        assert!(store.get(EntityType::Note, &create.record_id).await.unwrap().is_none());
        assert_eq!(store.discard(&create.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_discard_update_clears_pending() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        store
            .put(EntityType::Note, "n1", &json!({ "child_id": "c", "content": "server" }), false)
            .await
            .unwrap();
        let update = store
            .apply_local(
                EntityType::Note,
                Action::Update,
                Some("n1"),
                Some(EventPayload::Note(NoteInput::new("c", "local"))),
            )
            .await
            .unwrap();

        assert_eq!(store.discard(&update.id).await.unwrap(), Some(1));

        let record = store.get(EntityType::Note, "n1").await.unwrap().unwrap();
        assert!(!record.pending_sync);
        assert_eq!(record.data["content"], "local");
        assert!(!store.has_pending("n1").await.unwrap());
    }

    #[tokio::test]
    async fn test_discard_all() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        store
            .put(EntityType::Note, "n1", &json!({ "child_id": "c", "content": "server" }), false)
            .await
            .unwrap();
        store
            .apply_local(
                EntityType::Note,
                Action::Update,
                Some("n1"),
                Some(EventPayload::Note(NoteInput::new("c", "local"))),
            )
            .await
            .unwrap();
        store
            .apply_local(EntityType::Feeding, Action::Create, None, Some(feeding()))
            .await
            .unwrap();

        assert_eq!(store.discard_all().await.unwrap(), 2);

        assert_eq!(store.queue().count().await.unwrap(), 0);
        assert!(store.list(EntityType::Feeding).await.unwrap().is_empty());
        let record = store.get(EntityType::Note, "n1").await.unwrap().unwrap();
        assert!(!record.pending_sync);
    }

    #[tokio::test]
    async fn test_deferred_events_are_superseded_by_confirmation() {
        let db = test_db().await;
        let store = LocalStore::new(db.pool.clone());
        store
            .put(EntityType::Note, "n1", &json!({ "child_id": "c", "content": "server" }), false)
            .await
            .unwrap();
        let update = store
            .apply_local(
                EntityType::Note,
                Action::Update,
                Some("n1"),
                Some(EventPayload::Note(NoteInput::new("c", "local"))),
            )
            .await
            .unwrap();

        let remote = SyncEvent::new("r1", EntityType::Note, Action::Update)
            .with_entity_id("n1")
            .with_data(json!({ "child_id": "c", "content": "remote" }));
        store.defer(&remote, "n1").await.unwrap();
        store.defer(&remote, "n1").await.unwrap();

        let held = store.deferred().await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, "r1");
        assert_eq!(held[0].target_id(), Some("n1"));
        assert_eq!(held[0].data, remote.data);

        store.confirm(&update, None).await.unwrap();
        assert!(store.deferred().await.unwrap().is_empty());
    }
}
