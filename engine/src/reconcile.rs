//! Reconciliation between the local mirror and the store.
//!
//! The policy decides, per read, whether the mirror can be trusted or the
//! store must be asked first:
//!
//! 1. A remote-backed store whose topic has been subscribed at least once in
//!    this process is refetched before every read, and the result replaces
//!    the mirror.
//! 2. Otherwise the mirror is served as is.
//!
//! Failures split in two. A store that is merely unreachable leaves the
//! last good mirror in place and the read is marked stale. A permission
//! failure clears the mirror and is surfaced as a blocking error: nothing
//! cached may be shown to a session that lost access.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::{newest_first, settings_from, EventBus, SyncEvent, TopicSnapshot};
use crate::ledger::{LogEntry, ProfitRecord};
use crate::mirror::LocalMirror;
use crate::record::{Document, Item, Record};
use crate::request::PurchaseRequest;
use crate::settings::Settings;
use crate::store::{BackendKind, StorageBackend};
use crate::subscription::SubscriptionManager;
use crate::topic::SETTINGS_DOC_ID;
use crate::Topic;

/// How current a read result is.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Fetched from the store for this read
    Fresh,
    /// Served from the mirror without asking the store
    Cached,
    /// The refetch failed transiently; this is the last good snapshot
    Stale(Error),
}

/// Result of a read-through.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub snapshot: TopicSnapshot,
    pub freshness: Freshness,
}

impl View {
    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale(_))
    }

    /// The items, when this is a weapons view.
    pub fn items(&self) -> Option<&Arc<Vec<Item>>> {
        match &self.snapshot {
            TopicSnapshot::Weapons(items) => Some(items),
            _ => None,
        }
    }
}

/// Read path shared by the facade and the write coordinator.
pub struct ReconciliationPolicy {
    backend: Arc<dyn StorageBackend>,
    mirror: Arc<LocalMirror>,
    subscriptions: Arc<SubscriptionManager>,
    events: EventBus,
}

impl ReconciliationPolicy {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        mirror: Arc<LocalMirror>,
        subscriptions: Arc<SubscriptionManager>,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            mirror,
            subscriptions,
            events,
        }
    }

    pub fn mirror(&self) -> &Arc<LocalMirror> {
        &self.mirror
    }

    /// Fetch the weapons collection and replace the mirror with it.
    ///
    /// On `PermissionDenied` the mirror is cleared and a `Blocked` event is
    /// published; any other error leaves the mirror untouched.
    pub async fn refresh(&self) -> Result<Arc<Vec<Item>>> {
        match self.backend.list(Topic::Weapons).await {
            Ok(documents) => {
                self.mirror.replace_all(Item::decode_all(&documents));
                let items = self.mirror.snapshot();
                self.events.emit(SyncEvent::MirrorRefreshed {
                    generation: self.mirror.generation(),
                    len: items.len(),
                });
                tracing::debug!(len = items.len(), "mirror refreshed");
                Ok(items)
            }
            Err(error) if error.is_blocking() => Err(self.block(Topic::Weapons, error)),
            Err(error) => {
                tracing::warn!(error = %error, "mirror refresh failed, keeping last snapshot");
                Err(error)
            }
        }
    }

    /// Denied access ends the session's trust in every topic: the mirror is
    /// cleared and `Blocked` published whichever read hit it.
    fn block(&self, topic: Topic, error: Error) -> Error {
        tracing::error!(topic = %topic, error = %error, "access to the store denied, clearing mirror");
        self.mirror.clear();
        self.events.emit(SyncEvent::Blocked(error.clone()));
        error
    }

    /// Uncached read of a non-mirrored topic.
    async fn fetch(&self, topic: Topic) -> Result<Vec<Document>> {
        self.backend.list(topic).await.map_err(|error| {
            if error.is_blocking() {
                self.block(topic, error)
            } else {
                error
            }
        })
    }

    /// Read `topic`, refetching first when the cache cannot be trusted.
    ///
    /// Only weapons are mirrored; every other topic is read from the store
    /// on each call and errors propagate since there is nothing to fall
    /// back on.
    pub async fn read_through(&self, topic: Topic) -> Result<View> {
        if topic != Topic::Weapons {
            let documents = self.fetch(topic).await?;
            return Ok(View {
                snapshot: TopicSnapshot::decode(topic, &documents),
                freshness: Freshness::Fresh,
            });
        }

        let must_refetch = self.backend.kind() == BackendKind::Remote
            && self.subscriptions.ever_subscribed(topic);
        if !must_refetch {
            return Ok(View {
                snapshot: TopicSnapshot::Weapons(self.mirror.snapshot()),
                freshness: Freshness::Cached,
            });
        }

        match self.refresh().await {
            Ok(items) => Ok(View {
                snapshot: TopicSnapshot::Weapons(items),
                freshness: Freshness::Fresh,
            }),
            Err(error) if error.is_retryable() => Ok(View {
                snapshot: TopicSnapshot::Weapons(self.mirror.snapshot()),
                freshness: Freshness::Stale(error),
            }),
            Err(error) => Err(error),
        }
    }

    /// Audit log, newest first.
    pub async fn logs(&self) -> Result<Vec<LogEntry>> {
        let documents = self.fetch(Topic::Logs).await?;
        Ok(newest_first(LogEntry::decode_all(&documents)))
    }

    pub async fn profits(&self) -> Result<Vec<ProfitRecord>> {
        let documents = self.fetch(Topic::Profits).await?;
        Ok(ProfitRecord::decode_all(&documents))
    }

    pub async fn purchase_requests(&self) -> Result<Vec<PurchaseRequest>> {
        let documents = self.fetch(Topic::PurchaseRequests).await?;
        Ok(PurchaseRequest::decode_all(&documents))
    }

    /// Current settings, or the defaults when the singleton is missing.
    pub async fn settings(&self) -> Result<Settings> {
        let document = match self.backend.get(Topic::Settings, SETTINGS_DOC_ID).await {
            Err(error) if error.is_blocking() => return Err(self.block(Topic::Settings, error)),
            other => other?,
        };
        Ok(settings_from(document.as_slice()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ItemDraft, MoneyType};
    use crate::store::MemoryBackend;

    fn policy(backend: Arc<MemoryBackend>) -> ReconciliationPolicy {
        let subscriptions = Arc::new(SubscriptionManager::new(backend.clone()));
        ReconciliationPolicy::new(backend, LocalMirror::shared(), subscriptions, EventBus::new(16))
    }

    #[tokio::test]
    async fn refresh_replaces_mirror() {
        let backend = MemoryBackend::shared();
        let draft = ItemDraft::new("Pistol", 1.0, 2.0, 3, MoneyType::Clean);
        backend
            .insert(Topic::Weapons, draft.into_item(String::new(), 0).to_fields())
            .await
            .unwrap();

        let policy = policy(backend);
        let items = policy.refresh().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(policy.mirror().len(), 1);
    }

    #[tokio::test]
    async fn local_store_reads_are_served_from_mirror() {
        let backend = MemoryBackend::shared();
        let policy = policy(backend.clone());
        backend
            .insert(Topic::Weapons, Default::default())
            .await
            .unwrap();

        let view = policy.read_through(Topic::Weapons).await.unwrap();
        assert_eq!(view.freshness, Freshness::Cached);
        assert!(view.items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_topics_always_hit_the_store() {
        let backend = MemoryBackend::shared();
        let policy = policy(backend.clone());
        let entry = LogEntry::new(crate::ledger::LogKind::System, "hello", 5);
        backend.insert(Topic::Logs, entry.to_fields()).await.unwrap();

        let view = policy.read_through(Topic::Logs).await.unwrap();
        assert_eq!(view.freshness, Freshness::Fresh);
        assert_eq!(view.snapshot.len(), 1);
        assert!(view.items().is_none());
    }

    #[tokio::test]
    async fn settings_default_when_missing() {
        let policy = policy(MemoryBackend::shared());
        assert_eq!(policy.settings().await.unwrap(), Settings::default());
    }
}
