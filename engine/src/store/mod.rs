//! The document store boundary.
//!
//! [`StorageBackend`] is the only way the engine touches durable state. Two
//! implementations exist: [`RemoteBackend`] talks to the hosted store over
//! HTTP and a multiplexed WebSocket, [`MemoryBackend`] is the in-process
//! local fallback. Core logic is written once against the trait and never
//! branches on which one is injected, apart from [`StorageBackend::kind`]
//! feeding the read-through decision.

mod memory;
mod query;
pub(crate) mod remote;
mod watch;

pub use memory::MemoryBackend;
pub use query::{Filter, FilterOp, Query};
pub use remote::RemoteBackend;
pub use watch::{WatchRegistry, WatchSender};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::record::{Document, Fields};
use crate::{DocumentId, Topic};

/// One delivery on a watch: the full current snapshot of the topic, or the
/// error that ended the watch.
pub type WatchEvent = Result<Vec<Document>>;

/// Identifier of a live watch.
pub type WatchId = String;

/// Whether documents live in a remote service or in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Local,
}

/// A live change subscription handed out by a backend.
#[derive(Debug)]
pub struct Watch {
    pub id: WatchId,
    pub topic: Topic,
    pub events: mpsc::UnboundedReceiver<WatchEvent>,
}

/// Document store capability.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Insert with a store-generated id.
    async fn insert(&self, topic: Topic, fields: Fields) -> Result<DocumentId>;

    async fn get(&self, topic: Topic, id: &str) -> Result<Option<Document>>;

    /// Merge `fields` into an existing document; `NotFound` if absent.
    async fn update(&self, topic: Topic, id: &str, fields: Fields) -> Result<()>;

    /// Create or overwrite a document under a caller-chosen id.
    async fn set(&self, topic: Topic, id: &str, fields: Fields) -> Result<()>;

    /// Delete a document; `NotFound` if absent.
    async fn delete(&self, topic: Topic, id: &str) -> Result<()>;

    async fn query(&self, topic: Topic, query: &Query) -> Result<Vec<Document>>;

    async fn list(&self, topic: Topic) -> Result<Vec<Document>> {
        self.query(topic, &Query::default()).await
    }

    /// Atomically add `delta` to a numeric field (missing counts as 0) and
    /// return the new value.
    async fn increment(&self, topic: Topic, id: &str, field: &str, delta: f64) -> Result<f64>;

    /// Whether [`StorageBackend::increment`] is available at all.
    fn supports_increment(&self) -> bool {
        true
    }

    /// Delete every listed document that exists; returns how many were removed.
    async fn batch_delete(&self, topic: Topic, ids: &[DocumentId]) -> Result<usize>;

    /// Open a watch. The first event is the current snapshot.
    async fn subscribe(&self, topic: Topic) -> Result<Watch>;

    async fn unsubscribe(&self, watch_id: &str) -> Result<()>;
}
