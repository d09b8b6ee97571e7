//! Change events for rendering layers.
//!
//! The core never calls into UI code. It publishes [`SyncEvent`]s on a
//! broadcast channel and whoever renders subscribes independently.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::Error;
use crate::ledger::{LogEntry, ProfitRecord};
use crate::record::{Document, Item, Record};
use crate::request::PurchaseRequest;
use crate::settings::Settings;
use crate::topic::SETTINGS_DOC_ID;
use crate::Topic;

/// Decoded contents of a topic after a change.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicSnapshot {
    Weapons(Arc<Vec<Item>>),
    /// Newest first
    Logs(Vec<LogEntry>),
    Profits(Vec<ProfitRecord>),
    /// `None` while the singleton has not been created yet
    Settings(Option<Settings>),
    PurchaseRequests(Vec<PurchaseRequest>),
}

impl TopicSnapshot {
    /// Decode raw documents of `topic`.
    pub fn decode(topic: Topic, documents: &[Document]) -> Self {
        match topic {
            Topic::Weapons => TopicSnapshot::Weapons(Arc::new(Item::decode_all(documents))),
            Topic::Logs => TopicSnapshot::Logs(newest_first(LogEntry::decode_all(documents))),
            Topic::Profits => TopicSnapshot::Profits(ProfitRecord::decode_all(documents)),
            Topic::Settings => TopicSnapshot::Settings(settings_from(documents)),
            Topic::PurchaseRequests => {
                TopicSnapshot::PurchaseRequests(PurchaseRequest::decode_all(documents))
            }
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            TopicSnapshot::Weapons(_) => Topic::Weapons,
            TopicSnapshot::Logs(_) => Topic::Logs,
            TopicSnapshot::Profits(_) => Topic::Profits,
            TopicSnapshot::Settings(_) => Topic::Settings,
            TopicSnapshot::PurchaseRequests(_) => Topic::PurchaseRequests,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TopicSnapshot::Weapons(items) => items.len(),
            TopicSnapshot::Logs(v) => v.len(),
            TopicSnapshot::Profits(v) => v.len(),
            TopicSnapshot::Settings(s) => usize::from(s.is_some()),
            TopicSnapshot::PurchaseRequests(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn newest_first(mut logs: Vec<LogEntry>) -> Vec<LogEntry> {
    logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    logs
}

pub(crate) fn settings_from(documents: &[Document]) -> Option<Settings> {
    documents
        .iter()
        .find(|d| d.id == SETTINGS_DOC_ID)
        .map(Settings::from_document)
}

/// Something the rendering layer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A topic delivered a new snapshot.
    TopicChanged(Topic, TopicSnapshot),
    /// A subscription failed; a refetch has been scheduled.
    SubscriptionError { topic: Topic, error: Error },
    /// The mirror was refetched after a write or an error.
    MirrorRefreshed { generation: u64, len: usize },
    /// Access was denied: the mirror is cleared and nothing will be served
    /// until an operator fixes the permissions.
    Blocked(Error),
}

/// Broadcast hub for [`SyncEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publish to current listeners. Having none is fine.
    pub fn emit(&self, event: SyncEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::object;
    use serde_json::json;

    #[test]
    fn logs_decode_newest_first() {
        let docs = vec![
            Document::new("a", object(json!({"type": "add", "timestamp": 10}))),
            Document::new("b", object(json!({"type": "sale", "timestamp": 30}))),
            Document::new("c", object(json!({"type": "delete", "timestamp": 20}))),
        ];
        let TopicSnapshot::Logs(logs) = TopicSnapshot::decode(Topic::Logs, &docs) else {
            panic!("expected logs");
        };
        let ids: Vec<_> = logs.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn settings_snapshot_uses_singleton() {
        let snapshot = TopicSnapshot::decode(Topic::Settings, &[]);
        assert_eq!(snapshot, TopicSnapshot::Settings(None));
        assert!(snapshot.is_empty());

        let docs = vec![Document::new(
            SETTINGS_DOC_ID,
            object(json!({"salesEnabled": false})),
        )];
        let TopicSnapshot::Settings(Some(settings)) = TopicSnapshot::decode(Topic::Settings, &docs)
        else {
            panic!("expected settings");
        };
        assert!(!settings.sales_enabled);
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(bus.emit(SyncEvent::Blocked(Error::PermissionDenied("x".into()))), 0);

        let mut rx = bus.subscribe();
        let event = SyncEvent::MirrorRefreshed {
            generation: 1,
            len: 0,
        };
        assert_eq!(bus.emit(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
