use async_trait::async_trait;
use carelog_core::PayloadKind;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use std::marker::PhantomData;
use uuid::Uuid;

use crate::server::services::{Record, RecordService, ServiceError};

/// SQLite-backed collaborator for one entity type.
///
/// Each entity type has its own table; the request shape is stored as JSON
/// and replaced whole on update. Rows carry the owning family and every
/// statement filters on it.
pub struct SqliteRecords<I> {
    pool: SqlitePool,
    _kind: PhantomData<fn() -> I>,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    data: String,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl<I: PayloadKind> SqliteRecords<I> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _kind: PhantomData,
        }
    }

    fn table() -> &'static str {
        I::ENTITY.table_name()
    }

    fn hydrate(row: RecordRow) -> Result<Record<I>, ServiceError> {
        let data: I = serde_json::from_str(&row.data)
            .map_err(|e| ServiceError::Invalid(format!("stored {} {}: {}", I::ENTITY, row.id, e)))?;

        Ok(Record {
            created_at: parse_time(&row.id, &row.created_at)?,
            updated_at: parse_time(&row.id, &row.updated_at)?,
            id: row.id,
            data,
            created_by: row.created_by,
        })
    }
}

fn parse_time(id: &str, value: &str) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ServiceError::Invalid(format!("record {} has timestamp '{}': {}", id, value, e)))
}

fn encode<I: PayloadKind>(input: &I) -> Result<String, ServiceError> {
    serde_json::to_string(input).map_err(|e| ServiceError::Invalid(e.to_string()))
}

#[async_trait]
impl<I: PayloadKind> RecordService<I> for SqliteRecords<I> {
    async fn create(
        &self,
        family: &str,
        author: Option<&str>,
        input: I,
    ) -> Result<String, ServiceError> {
        let id = Uuid::new_v4().to_string();
        let data = encode(&input)?;
        let now = Utc::now().to_rfc3339();

        let sql = format!(
            "INSERT INTO {} (id, family_id, data, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            Self::table()
        );
        sqlx::query(&sql)
            .bind(&id)
            .bind(family)
            .bind(&data)
            .bind(author)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn get(&self, family: &str, id: &str) -> Result<Option<Record<I>>, ServiceError> {
        let sql = format!(
            "SELECT id, data, created_by, created_at, updated_at FROM {} WHERE id = ? AND family_id = ?",
            Self::table()
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(family)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::hydrate).transpose()
    }

    async fn list(&self, family: &str) -> Result<Vec<Record<I>>, ServiceError> {
        let sql = format!(
            "SELECT id, data, created_by, created_at, updated_at FROM {} WHERE family_id = ? ORDER BY created_at, id",
            Self::table()
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(family)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::hydrate).collect()
    }

    async fn update(&self, family: &str, id: &str, input: I) -> Result<(), ServiceError> {
        let data = encode(&input)?;
        let sql = format!(
            "UPDATE {} SET data = ?, updated_at = ? WHERE id = ? AND family_id = ?",
            Self::table()
        );
        let result = sqlx::query(&sql)
            .bind(&data)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .bind(family)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, family: &str, id: &str) -> Result<(), ServiceError> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ? AND family_id = ?",
            Self::table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(family)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn deactivate(&self, family: &str, id: &str) -> Result<(), ServiceError> {
        let sql = format!(
            "SELECT data FROM {} WHERE id = ? AND family_id = ?",
            Self::table()
        );
        let data: Option<String> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(family)
            .fetch_optional(&self.pool)
            .await?;
        let data = data.ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        let mut value: Value =
            serde_json::from_str(&data).map_err(|e| ServiceError::Invalid(e.to_string()))?;
        match value.as_object_mut() {
            Some(fields) => {
                fields.insert("active".to_string(), Value::Bool(false));
            }
            None => {
                return Err(ServiceError::Invalid(format!(
                    "stored {} {} is not an object",
                    I::ENTITY,
                    id
                )))
            }
        }

        let sql = format!(
            "UPDATE {} SET data = ?, updated_at = ? WHERE id = ? AND family_id = ?",
            Self::table()
        );
        sqlx::query(&sql)
            .bind(value.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .bind(family)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use carelog_core::{FeedingInput, FeedingType, MedicationInput, NoteInput};
    use tempfile::TempDir;

    struct TestContext {
        pool: SqlitePool,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        TestContext {
            pool,
            _temp_dir: temp_dir,
        }
    }

    fn feeding() -> FeedingInput {
        let start = DateTime::parse_from_rfc3339("2025-03-01T06:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        FeedingInput::new("child-1", FeedingType::Bottle, start).with_amount_ml(90.0)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let ctx = setup().await;
        let repo = SqliteRecords::<FeedingInput>::new(ctx.pool.clone());

        let id = repo.create("family1", None, feeding()).await.unwrap();
        let record = repo.get("family1", &id).await.unwrap().unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.data, feeding());
        assert!(record.created_by.is_none());
    }

    #[tokio::test]
    async fn test_create_records_author() {
        let ctx = setup().await;
        let repo = SqliteRecords::<NoteInput>::new(ctx.pool.clone());

        let id = repo
            .create("family1", Some("parent1"), NoteInput::new("child-1", "Rolled over"))
            .await
            .unwrap();

        let record = repo.get("family1", &id).await.unwrap().unwrap();
        assert_eq!(record.created_by.as_deref(), Some("parent1"));
    }

    #[tokio::test]
    async fn test_update_replaces_data() {
        let ctx = setup().await;
        let repo = SqliteRecords::<FeedingInput>::new(ctx.pool.clone());
        let id = repo.create("family1", None, feeding()).await.unwrap();

        let replacement = feeding().with_notes("Spit up a little");
        repo.update("family1", &id, replacement.clone()).await.unwrap();

        let record = repo.get("family1", &id).await.unwrap().unwrap();
        assert_eq!(record.data, replacement);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let ctx = setup().await;
        let repo = SqliteRecords::<FeedingInput>::new(ctx.pool.clone());

        let result = repo.update("family1", "missing", feeding()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let ctx = setup().await;
        let repo = SqliteRecords::<FeedingInput>::new(ctx.pool.clone());
        let id = repo.create("family1", None, feeding()).await.unwrap();

        repo.delete("family1", &id).await.unwrap();
        assert!(repo.get("family1", &id).await.unwrap().is_none());

        let again = repo.delete("family1", &id).await;
        assert!(matches!(again, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_is_per_table() {
        let ctx = setup().await;
        let feedings = SqliteRecords::<FeedingInput>::new(ctx.pool.clone());
        let notes = SqliteRecords::<NoteInput>::new(ctx.pool.clone());

        feedings.create("family1", None, feeding()).await.unwrap();
        feedings.create("family1", None, feeding()).await.unwrap();
        notes.create("family1", None, NoteInput::new("child-1", "hello")).await.unwrap();

        assert_eq!(feedings.list("family1").await.unwrap().len(), 2);
        assert_eq!(notes.list("family1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_medication() {
        let ctx = setup().await;
        let repo = SqliteRecords::<MedicationInput>::new(ctx.pool.clone());
        let id = repo
            .create("family1", None, MedicationInput::new("child-1", "Amoxicillin", "5 ml"))
            .await
            .unwrap();

        repo.deactivate("family1", &id).await.unwrap();

        let record = repo.get("family1", &id).await.unwrap().unwrap();
        assert!(!record.data.active);
        assert_eq!(record.data.name, "Amoxicillin");
    }

    #[tokio::test]
    async fn test_deactivate_missing_is_not_found() {
        let ctx = setup().await;
        let repo = SqliteRecords::<MedicationInput>::new(ctx.pool.clone());

        let result = repo.deactivate("family1", "missing").await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_other_family_cannot_see_or_touch_record() {
        let ctx = setup().await;
        let repo = SqliteRecords::<NoteInput>::new(ctx.pool.clone());
        let id = repo
            .create("family1", Some("parent1"), NoteInput::new("child-1", "Private"))
            .await
            .unwrap();

        assert!(repo.get("family2", &id).await.unwrap().is_none());
        assert!(repo.list("family2").await.unwrap().is_empty());
        assert!(matches!(
            repo.update("family2", &id, NoteInput::new("child-1", "Overwritten")).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            repo.delete("family2", &id).await,
            Err(ServiceError::NotFound(_))
        ));

        let record = repo.get("family1", &id).await.unwrap().unwrap();
        assert_eq!(record.data.content, "Private");
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_reported() {
        let ctx = setup().await;
        let repo = SqliteRecords::<NoteInput>::new(ctx.pool.clone());
        let id = repo
            .create("family1", None, NoteInput::new("child-1", "hello"))
            .await
            .unwrap();

        sqlx::query("UPDATE notes SET updated_at = 'not a time' WHERE id = ?")
            .bind(&id)
            .execute(&ctx.pool)
            .await
            .unwrap();

        assert!(matches!(
            repo.get("family1", &id).await,
            Err(ServiceError::Invalid(_))
        ));
    }
}
