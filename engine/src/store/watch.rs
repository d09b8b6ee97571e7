//! Registry of live watches on store topics.
//!
//! Each watch owns an unbounded channel; every write to a topic pushes the
//! topic's full document snapshot to all watches of that topic. Store
//! implementations (in-process and the server's database store) share it.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::record::Document;
use crate::Topic;

use super::{Watch, WatchEvent};

/// Sender half of a watch channel.
pub type WatchSender = mpsc::UnboundedSender<WatchEvent>;

#[derive(Debug)]
struct Watcher {
    topic: Topic,
    sender: WatchSender,
}

/// Tracks watches and fans out snapshots.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watchers: DashMap<String, Watcher>,
    /// Index of watch ids by topic.
    by_topic: DashMap<Topic, HashSet<String>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch on `topic`. Nothing is delivered yet; the caller
    /// sends the initial snapshot with [`WatchRegistry::send_to`].
    pub fn register(&self, topic: Topic) -> Watch {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, events) = mpsc::unbounded_channel();

        self.watchers
            .insert(id.clone(), Watcher { topic, sender });
        self.by_topic.entry(topic).or_default().insert(id.clone());

        tracing::debug!(watch_id = %id, topic = %topic, "watch registered");
        Watch { id, topic, events }
    }

    /// Remove a watch. Returns whether it existed.
    pub fn unregister(&self, watch_id: &str) -> bool {
        let Some((_, watcher)) = self.watchers.remove(watch_id) else {
            return false;
        };
        if let Some(mut ids) = self.by_topic.get_mut(&watcher.topic) {
            ids.remove(watch_id);
            if ids.is_empty() {
                drop(ids);
                self.by_topic.remove(&watcher.topic);
            }
        }
        tracing::debug!(watch_id = %watch_id, topic = %watcher.topic, "watch unregistered");
        true
    }

    /// Deliver an event to one watch.
    pub fn send_to(&self, watch_id: &str, event: WatchEvent) -> bool {
        match self.watchers.get(watch_id) {
            Some(w) => w.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Push a snapshot to every watch of `topic`, pruning closed channels.
    ///
    /// Returns the number of watches reached.
    pub fn notify(&self, topic: Topic, documents: &[Document]) -> usize {
        let ids: Vec<String> = match self.by_topic.get(&topic) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return 0,
        };

        let mut sent = 0;
        let mut closed = Vec::new();
        for id in ids {
            if self.send_to(&id, Ok(documents.to_vec())) {
                sent += 1;
            } else {
                closed.push(id);
            }
        }
        for id in closed {
            self.unregister(&id);
        }

        tracing::trace!(topic = %topic, recipients = sent, "snapshot fanned out");
        sent
    }

    /// Send an error to every watch and drop them all.
    pub fn fail_all(&self, error: Error) -> usize {
        let ids: Vec<String> = self.watchers.iter().map(|e| e.key().clone()).collect();
        let count = ids.len();
        for id in ids {
            self.send_to(&id, Err(error.clone()));
            self.unregister(&id);
        }
        count
    }

    pub fn topic_of(&self, watch_id: &str) -> Option<Topic> {
        self.watchers.get(watch_id).map(|w| w.topic)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    pub fn watchers_for(&self, topic: Topic) -> usize {
        self.by_topic.get(&topic).map(|ids| ids.len()).unwrap_or(0)
    }
}
