//! Snapshot types for persisting and restoring an in-process store.
//!
//! A snapshot is the bridge between [`MemoryBackend`](crate::store::MemoryBackend)
//! and a file on disk when running without the hosted store. It is designed
//! for deterministic serialization.

use crate::record::Fields;
use crate::topic::SETTINGS_DOC_ID;
use crate::{error::Result, DocumentId, Error, Timestamp, Topic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of every document in the store.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// When the snapshot was taken (milliseconds since epoch)
    pub taken_at: Timestamp,
    /// Documents by topic, then by id
    pub collections: BTreeMap<Topic, BTreeMap<DocumentId, Fields>>,
}

impl BackendSnapshot {
    /// Create a new empty snapshot.
    pub fn new(taken_at: Timestamp) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            taken_at,
            collections: BTreeMap::new(),
        }
    }

    /// Add a document to the snapshot.
    pub fn add(&mut self, topic: Topic, id: impl Into<DocumentId>, fields: Fields) {
        self.collections
            .entry(topic)
            .or_default()
            .insert(id.into(), fields);
    }

    pub fn get(&self, topic: Topic, id: &str) -> Option<&Fields> {
        self.collections.get(&topic)?.get(id)
    }

    /// Count documents across all topics.
    pub fn document_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Check structural invariants before a restore.
    pub fn validate(&self) -> Result<()> {
        for (topic, docs) in &self.collections {
            if docs.keys().any(|id| id.is_empty()) {
                return Err(Error::InvalidSnapshot(format!(
                    "empty document id in {}",
                    topic
                )));
            }
            if topic.is_singleton() && docs.keys().any(|id| id != SETTINGS_DOC_ID) {
                return Err(Error::InvalidSnapshot(format!(
                    "{} may only hold {}",
                    topic, SETTINGS_DOC_ID
                )));
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        snapshot.validate()?;
        Ok(snapshot)
    }
}
