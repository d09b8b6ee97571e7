//! PostgreSQL-backed document store.
//!
//! All collections share the `documents` table. Filters are evaluated with
//! the engine's [`Query`] over the collection in insertion order, so both
//! stores answer queries identically. Watches are served from a
//! [`WatchRegistry`]: after every write the collection is re-read and fanned
//! out as a full snapshot.

use armory_engine::store::{BackendKind, Watch, WatchRegistry};
use armory_engine::{Document, DocumentId, Error, Fields, Query, StorageBackend, Topic};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};
use tokio::sync::Mutex;

use super::Pool;

type Result<T> = armory_engine::Result<T>;

/// One row of the `documents` table.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub fields: Fields,
}

impl FromRow<'_, PgRow> for DocumentRow {
    fn from_row(row: &PgRow) -> std::result::Result<Self, sqlx::Error> {
        let Json(fields): Json<Fields> = row.try_get("fields")?;
        Ok(Self {
            id: row.try_get("id")?,
            fields,
        })
    }
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document::new(row.id, row.fields)
    }
}

/// Database failures surface as an unreachable store.
fn db_error(e: sqlx::Error) -> Error {
    tracing::error!("Database error: {:?}", e);
    Error::Unreachable(format!("database error: {}", e))
}

/// [`StorageBackend`] over PostgreSQL.
#[derive(Debug)]
pub struct PgDocumentStore {
    pool: Pool,
    watches: WatchRegistry,
    /// Serializes snapshot fan-out with watch registration so no watch sees
    /// an older snapshot after a newer one.
    publish: Mutex<()>,
}

impl PgDocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            watches: WatchRegistry::new(),
            publish: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    async fn fetch_all(&self, topic: Topic) -> Result<Vec<Document>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            r#"
            SELECT id, fields
            FROM documents
            WHERE collection = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(topic.collection())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Document::from).collect())
    }

    /// Push the current contents of `topic` to its watches.
    async fn publish(&self, topic: Topic) {
        if self.watches.watchers_for(topic) == 0 {
            return;
        }
        let _guard = self.publish.lock().await;
        match self.fetch_all(topic).await {
            Ok(documents) => {
                self.watches.notify(topic, &documents);
            }
            Err(e) => {
                tracing::warn!(topic = %topic, "Failed to publish snapshot: {}", e);
            }
        }
    }

    async fn exists(&self, topic: Topic, id: &str) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(topic.collection())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl StorageBackend for PgDocumentStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn insert(&self, topic: Topic, fields: Fields) -> Result<DocumentId> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, fields)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(topic.collection())
        .bind(&id)
        .bind(Json(&fields))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.publish(topic).await;
        Ok(id)
    }

    async fn get(&self, topic: Topic, id: &str) -> Result<Option<Document>> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, fields FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(topic.collection())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Document::from))
    }

    async fn update(&self, topic: Topic, id: &str, fields: Fields) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET fields = fields || $3, updated_at = NOW()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(topic.collection())
        .bind(id)
        .bind(Json(&fields))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("{}/{}", topic, id)));
        }
        self.publish(topic).await;
        Ok(())
    }

    async fn set(&self, topic: Topic, id: &str, fields: Fields) -> Result<()> {
        if id.is_empty() {
            return Err(Error::ValidationFailed("empty document id".to_string()));
        }
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, fields)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id)
            DO UPDATE SET fields = EXCLUDED.fields, updated_at = NOW()
            "#,
        )
        .bind(topic.collection())
        .bind(id)
        .bind(Json(&fields))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.publish(topic).await;
        Ok(())
    }

    async fn delete(&self, topic: Topic, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(topic.collection())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("{}/{}", topic, id)));
        }
        self.publish(topic).await;
        Ok(())
    }

    async fn query(&self, topic: Topic, query: &Query) -> Result<Vec<Document>> {
        let documents = self.fetch_all(topic).await?;
        Ok(query.apply(documents))
    }

    async fn increment(&self, topic: Topic, id: &str, field: &str, delta: f64) -> Result<f64> {
        if !delta.is_finite() {
            return Err(Error::ValidationFailed("increment must be finite".to_string()));
        }

        // Only numeric or missing fields are touched; the row lock makes the
        // read-modify-write atomic.
        let value: Option<f64> = sqlx::query_scalar(
            r#"
            UPDATE documents
            SET fields = jsonb_set(
                    fields,
                    ARRAY[$3::text],
                    to_jsonb(COALESCE((fields ->> $3::text)::float8, 0) + $4)
                ),
                updated_at = NOW()
            WHERE collection = $1 AND id = $2
              AND jsonb_typeof(COALESCE(fields -> $3::text, 'null'::jsonb)) IN ('number', 'null')
            RETURNING (fields ->> $3::text)::float8
            "#,
        )
        .bind(topic.collection())
        .bind(id)
        .bind(field)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match value {
            Some(value) => {
                self.publish(topic).await;
                Ok(value)
            }
            None if self.exists(topic, id).await? => Err(Error::ValidationFailed(format!(
                "field {} is not numeric",
                field
            ))),
            None => Err(Error::NotFound(format!("{}/{}", topic, id))),
        }
    }

    async fn batch_delete(&self, topic: Topic, ids: &[DocumentId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = ANY($2)")
            .bind(topic.collection())
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        let deleted = result.rows_affected() as usize;
        if deleted > 0 {
            self.publish(topic).await;
        }
        Ok(deleted)
    }

    async fn subscribe(&self, topic: Topic) -> Result<Watch> {
        let _guard = self.publish.lock().await;
        let watch = self.watches.register(topic);
        match self.fetch_all(topic).await {
            Ok(documents) => {
                self.watches.send_to(&watch.id, Ok(documents));
                Ok(watch)
            }
            Err(e) => {
                self.watches.unregister(&watch.id);
                Err(e)
            }
        }
    }

    async fn unsubscribe(&self, watch_id: &str) -> Result<()> {
        self.watches.unregister(watch_id);
        Ok(())
    }
}
