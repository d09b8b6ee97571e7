//! Document operations behind the `/v1` routes.
//!
//! Every handler works against the injected [`StorageBackend`], so the same
//! code serves the PostgreSQL store and the in-memory one.

use armory_engine::store::Filter;
use armory_engine::wire::{
    BatchDeleteRequest, BatchDeleteResponse, IncrementRequest, IncrementResponse, InsertResponse,
};
use armory_engine::{Document, Error, Fields, Query, StorageBackend, Topic};
use serde::Deserialize;

use crate::error::{AppError, Result};

/// Query string of `GET /v1/{topic}`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// JSON array of filters
    #[serde(rename = "where")]
    pub filters: Option<String>,
    pub limit: Option<usize>,
}

impl ListParams {
    pub fn into_query(self) -> Result<Query> {
        let filters = match self.filters.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<Filter>>(raw)
                .map_err(|e| AppError::BadRequest(format!("invalid where clause: {}", e)))?,
        };
        Ok(Query {
            filters,
            limit: self.limit,
        })
    }
}

/// Resolve a collection name from the path.
pub fn parse_topic(name: &str) -> Result<Topic> {
    Ok(name.parse::<Topic>()?)
}

pub async fn handle_list(
    store: &dyn StorageBackend,
    topic: Topic,
    params: ListParams,
) -> Result<Vec<Document>> {
    let query = params.into_query()?;
    let documents = store.query(topic, &query).await?;
    tracing::debug!(
        topic = %topic,
        filters = query.filters.len(),
        returned = documents.len(),
        "documents listed"
    );
    Ok(documents)
}

pub async fn handle_insert(
    store: &dyn StorageBackend,
    topic: Topic,
    fields: Fields,
) -> Result<InsertResponse> {
    if topic.is_singleton() {
        return Err(AppError::BadRequest(format!(
            "{} is a singleton, write it by id",
            topic
        )));
    }
    let id = store.insert(topic, fields).await?;
    tracing::debug!(topic = %topic, id = %id, "document inserted");
    Ok(InsertResponse { id })
}

pub async fn handle_get(store: &dyn StorageBackend, topic: Topic, id: &str) -> Result<Document> {
    store
        .get(topic, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{}/{}", topic, id)).into())
}

pub async fn handle_update(
    store: &dyn StorageBackend,
    topic: Topic,
    id: &str,
    fields: Fields,
) -> Result<()> {
    store.update(topic, id, fields).await?;
    tracing::debug!(topic = %topic, id = %id, "document updated");
    Ok(())
}

pub async fn handle_set(
    store: &dyn StorageBackend,
    topic: Topic,
    id: &str,
    fields: Fields,
) -> Result<()> {
    store.set(topic, id, fields).await?;
    tracing::debug!(topic = %topic, id = %id, "document set");
    Ok(())
}

pub async fn handle_delete(store: &dyn StorageBackend, topic: Topic, id: &str) -> Result<()> {
    store.delete(topic, id).await?;
    tracing::debug!(topic = %topic, id = %id, "document deleted");
    Ok(())
}

pub async fn handle_increment(
    store: &dyn StorageBackend,
    topic: Topic,
    id: &str,
    request: IncrementRequest,
) -> Result<IncrementResponse> {
    if request.field.trim().is_empty() {
        return Err(AppError::BadRequest("field is required".to_string()));
    }
    let value = store
        .increment(topic, id, &request.field, request.delta)
        .await?;
    tracing::debug!(
        topic = %topic,
        id = %id,
        field = %request.field,
        delta = request.delta,
        value,
        "field incremented"
    );
    Ok(IncrementResponse { value })
}

pub async fn handle_batch_delete(
    store: &dyn StorageBackend,
    topic: Topic,
    request: BatchDeleteRequest,
) -> Result<BatchDeleteResponse> {
    let deleted = store.batch_delete(topic, &request.ids).await?;
    tracing::info!(
        topic = %topic,
        requested = request.ids.len(),
        deleted,
        "batch delete"
    );
    Ok(BatchDeleteResponse { deleted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use armory_engine::store::FilterOp;
    use armory_engine::MemoryBackend;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn where_clause_parsing() {
        let params = ListParams {
            filters: Some(r#"[{"field": "name", "op": "eq", "value": "Pistol"}]"#.into()),
            limit: Some(3),
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.filters[0].op, FilterOp::Eq);
        assert_eq!(query.limit, Some(3));

        let params = ListParams {
            filters: Some("name = Pistol".into()),
            limit: None,
        };
        assert!(matches!(params.into_query(), Err(AppError::BadRequest(_))));

        assert!(ListParams::default().into_query().unwrap().filters.is_empty());
    }

    #[test]
    fn unknown_collection_is_not_found() {
        assert!(matches!(
            parse_topic("armour"),
            Err(AppError::Engine(Error::NotFound(_)))
        ));
        assert_eq!(parse_topic("purchaseRequests").unwrap(), Topic::PurchaseRequests);
    }

    #[tokio::test]
    async fn insert_then_filter() {
        let store = MemoryBackend::new();
        for (name, qty) in [("Pistol", 2), ("Rifle", 0)] {
            handle_insert(&store, Topic::Weapons, fields(json!({"name": name, "quantity": qty})))
                .await
                .unwrap();
        }

        let params = ListParams {
            filters: Some(r#"[{"field": "quantity", "op": "gt", "value": 0}]"#.into()),
            limit: None,
        };
        let docs = handle_list(&store, Topic::Weapons, params).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].fields["name"], json!("Pistol"));
    }

    #[tokio::test]
    async fn settings_cannot_be_inserted() {
        let store = MemoryBackend::new();
        let result = handle_insert(&store, Topic::Settings, Fields::new()).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn missing_document() {
        let store = MemoryBackend::new();
        assert!(matches!(
            handle_get(&store, Topic::Logs, "nope").await,
            Err(AppError::Engine(Error::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn increment_needs_a_field() {
        let store = MemoryBackend::new();
        let id = store
            .insert(Topic::Weapons, fields(json!({"quantity": 1})))
            .await
            .unwrap();

        let request = IncrementRequest {
            field: " ".into(),
            delta: 1.0,
        };
        assert!(matches!(
            handle_increment(&store, Topic::Weapons, &id, request).await,
            Err(AppError::BadRequest(_))
        ));

        let request = IncrementRequest {
            field: "quantity".into(),
            delta: -1.0,
        };
        let response = handle_increment(&store, Topic::Weapons, &id, request)
            .await
            .unwrap();
        assert_eq!(response.value, 0.0);
    }
}
