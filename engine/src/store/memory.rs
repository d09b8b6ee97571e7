//! In-process document store: the local fallback when no hosted store is
//! configured, and the backing store of the server's database-less mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::record::{Document, Fields};
use crate::snapshot::BackendSnapshot;
use crate::{DocumentId, Timestamp, Topic};

use super::{BackendKind, Query, StorageBackend, Watch, WatchRegistry};

type Collection = BTreeMap<DocumentId, Fields>;

/// Documents held in memory, with watch fan-out on every write.
#[derive(Debug)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<Topic, Collection>>,
    watches: WatchRegistry,
    increment_enabled: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            watches: WatchRegistry::new(),
            increment_enabled: true,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Behave like a store without atomic increments.
    pub fn without_increment(mut self) -> Self {
        self.increment_enabled = false;
        self
    }

    /// Rebuild a store from a snapshot.
    pub fn restore(snapshot: BackendSnapshot) -> Result<Self> {
        snapshot.validate()?;
        let backend = Self::new();
        *backend.collections.write() = snapshot.collections.into_iter().collect();
        Ok(backend)
    }

    /// Copy every document into a snapshot.
    pub fn export(&self, taken_at: Timestamp) -> BackendSnapshot {
        let guard = self.collections.read();
        let mut snapshot = BackendSnapshot::new(taken_at);
        for (topic, docs) in guard.iter() {
            for (id, fields) in docs {
                snapshot.add(*topic, id.clone(), fields.clone());
            }
        }
        snapshot
    }

    pub fn document_count(&self, topic: Topic) -> usize {
        self.collections
            .read()
            .get(&topic)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    fn documents(collection: Option<&Collection>) -> Vec<Document> {
        collection
            .map(|c| {
                c.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run a mutation and, if it succeeds, push the new snapshot to watchers
    /// while still holding the write lock so snapshots arrive in write order.
    fn write<T, F>(&self, topic: Topic, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Collection) -> Result<T>,
    {
        let mut guard = self.collections.write();
        let collection = guard.entry(topic).or_default();
        let out = mutate(collection)?;
        let docs = Self::documents(Some(collection));
        self.watches.notify(topic, &docs);
        Ok(out)
    }
}

/// Keep whole numbers integral so quantities stay integers on the wire.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn insert(&self, topic: Topic, fields: Fields) -> Result<DocumentId> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.write(topic, |c| {
            c.insert(id.clone(), fields);
            Ok(())
        })?;
        tracing::trace!(topic = %topic, id = %id, "document inserted");
        Ok(id)
    }

    async fn get(&self, topic: Topic, id: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(&topic)
            .and_then(|c| c.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn update(&self, topic: Topic, id: &str, fields: Fields) -> Result<()> {
        self.write(topic, |c| {
            let doc = c.get_mut(id).ok_or_else(|| Error::not_found(topic, id))?;
            doc.extend(fields);
            Ok(())
        })
    }

    async fn set(&self, topic: Topic, id: &str, fields: Fields) -> Result<()> {
        if id.is_empty() {
            return Err(Error::ValidationFailed("empty document id".to_string()));
        }
        self.write(topic, |c| {
            c.insert(id.to_string(), fields);
            Ok(())
        })
    }

    async fn delete(&self, topic: Topic, id: &str) -> Result<()> {
        self.write(topic, |c| {
            c.remove(id)
                .map(|_| ())
                .ok_or_else(|| Error::not_found(topic, id))
        })
    }

    async fn query(&self, topic: Topic, query: &Query) -> Result<Vec<Document>> {
        let guard = self.collections.read();
        Ok(query.apply(Self::documents(guard.get(&topic))))
    }

    async fn increment(&self, topic: Topic, id: &str, field: &str, delta: f64) -> Result<f64> {
        if !self.increment_enabled {
            return Err(Error::Unreachable("atomic increment unavailable".to_string()));
        }
        if !delta.is_finite() {
            return Err(Error::ValidationFailed("increment must be finite".to_string()));
        }
        self.write(topic, |c| {
            let doc = c.get_mut(id).ok_or_else(|| Error::not_found(topic, id))?;
            let current = match doc.get(field) {
                None | Some(Value::Null) => 0.0,
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(_) => {
                    return Err(Error::ValidationFailed(format!(
                        "field {} is not numeric",
                        field
                    )))
                }
            };
            let next = current + delta;
            doc.insert(field.to_string(), number_value(next));
            Ok(next)
        })
    }

    fn supports_increment(&self) -> bool {
        self.increment_enabled
    }

    async fn batch_delete(&self, topic: Topic, ids: &[DocumentId]) -> Result<usize> {
        self.write(topic, |c| {
            Ok(ids.iter().filter(|id| c.remove(id.as_str()).is_some()).count())
        })
    }

    async fn subscribe(&self, topic: Topic) -> Result<Watch> {
        // Register and seed under the read lock: no write can slip between.
        let guard = self.collections.read();
        let watch = self.watches.register(topic);
        self.watches
            .send_to(&watch.id, Ok(Self::documents(guard.get(&topic))));
        Ok(watch)
    }

    async fn unsubscribe(&self, watch_id: &str) -> Result<()> {
        self.watches.unregister(watch_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::object;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        object(value)
    }

    #[tokio::test]
    async fn insert_get_update_delete() {
        let store = MemoryBackend::new();
        let id = store
            .insert(Topic::Weapons, fields(json!({"name": "Pistol", "quantity": 1})))
            .await
            .unwrap();

        let doc = store.get(Topic::Weapons, &id).await.unwrap().unwrap();
        assert_eq!(doc.fields["name"], json!("Pistol"));

        store
            .update(Topic::Weapons, &id, fields(json!({"quantity": 4})))
            .await
            .unwrap();
        let doc = store.get(Topic::Weapons, &id).await.unwrap().unwrap();
        assert_eq!(doc.fields["quantity"], json!(4));
        assert_eq!(doc.fields["name"], json!("Pistol"));

        store.delete(Topic::Weapons, &id).await.unwrap();
        assert!(store.get(Topic::Weapons, &id).await.unwrap().is_none());
        assert!(matches!(
            store.delete(Topic::Weapons, &id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryBackend::new();
        let err = store
            .update(Topic::Weapons, "nope", Fields::new())
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound("weapons/nope".into()));
    }

    #[tokio::test]
    async fn increment_keeps_integers() {
        let store = MemoryBackend::new();
        let id = store
            .insert(Topic::Weapons, fields(json!({"quantity": 2})))
            .await
            .unwrap();
        let next = store
            .increment(Topic::Weapons, &id, "quantity", -1.0)
            .await
            .unwrap();
        assert_eq!(next, 1.0);
        let doc = store.get(Topic::Weapons, &id).await.unwrap().unwrap();
        assert_eq!(doc.fields["quantity"], json!(1));
        assert!(doc.fields["quantity"].is_i64());

        let missing = store
            .increment(Topic::Weapons, &id, "sold", 1.0)
            .await
            .unwrap();
        assert_eq!(missing, 1.0);
    }

    #[tokio::test]
    async fn increment_can_be_disabled() {
        let store = MemoryBackend::new().without_increment();
        assert!(!store.supports_increment());
        let id = store.insert(Topic::Weapons, Fields::new()).await.unwrap();
        assert!(store
            .increment(Topic::Weapons, &id, "quantity", 1.0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn batch_delete_counts_existing() {
        let store = MemoryBackend::new();
        let a = store.insert(Topic::Logs, Fields::new()).await.unwrap();
        let b = store.insert(Topic::Logs, Fields::new()).await.unwrap();
        let deleted = store
            .batch_delete(Topic::Logs, &[a, b, "ghost".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.document_count(Topic::Logs), 0);
    }

    #[tokio::test]
    async fn subscribe_seeds_then_follows_writes() {
        let store = MemoryBackend::new();
        store
            .insert(Topic::Weapons, fields(json!({"name": "Pistol"})))
            .await
            .unwrap();

        let mut watch = store.subscribe(Topic::Weapons).await.unwrap();
        let first = watch.events.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        store
            .insert(Topic::Weapons, fields(json!({"name": "SMG"})))
            .await
            .unwrap();
        let second = watch.events.recv().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);

        store.unsubscribe(&watch.id).await.unwrap();
        assert_eq!(watch.events.recv().await, None);
    }

    #[tokio::test]
    async fn export_and_restore() {
        let store = MemoryBackend::new();
        store
            .set(Topic::Settings, "appSettings", fields(json!({"salesEnabled": true})))
            .await
            .unwrap();
        store
            .insert(Topic::Profits, fields(json!({"profit": 5})))
            .await
            .unwrap();

        let snapshot = store.export(42);
        assert_eq!(snapshot.document_count(), 2);

        let restored = MemoryBackend::restore(snapshot).unwrap();
        assert_eq!(restored.document_count(Topic::Profits), 1);
        assert!(restored
            .get(Topic::Settings, "appSettings")
            .await
            .unwrap()
            .is_some());
    }
}
