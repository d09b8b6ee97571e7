//! Change subscriptions, one per topic.
//!
//! Subscribing to a topic that already has a live subscription tears the old
//! one down first, so there is never more than one listener per topic and a
//! superseded listener can no longer deliver. Each subscription is drained
//! by its own task which hands full snapshots to `on_change` and, when the
//! watch fails, reports to `on_error` exactly once and stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::record::Document;
use crate::store::{StorageBackend, WatchId};
use crate::Topic;

/// Lifecycle of a topic's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribed,
    /// The watch ended with an error; a new subscribe moves back to `Subscribed`
    Failed,
    /// Terminal, after [`SubscriptionManager::teardown`]
    TornDown,
}

struct ActiveSubscription {
    watch_id: WatchId,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Owns every live subscription.
pub struct SubscriptionManager {
    backend: Arc<dyn StorageBackend>,
    active: Arc<DashMap<Topic, ActiveSubscription>>,
    states: Arc<DashMap<Topic, SubscriptionState>>,
    /// Topics subscribed successfully at least once in this process.
    established: DashSet<Topic>,
    torn_down: AtomicBool,
    /// Serializes cancel-then-replace.
    replace_lock: Mutex<()>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("active", &self.active_topics())
            .field("torn_down", &self.torn_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            active: Arc::new(DashMap::new()),
            states: Arc::new(DashMap::new()),
            established: DashSet::new(),
            torn_down: AtomicBool::new(false),
            replace_lock: Mutex::new(()),
        }
    }

    /// Subscribe to `topic`, replacing any existing subscription.
    ///
    /// `on_change` receives every full snapshot, starting with the current
    /// one. `on_error` is called once if the watch fails; the subscription
    /// is then over and the caller decides whether to resubscribe.
    pub async fn subscribe<C, E>(&self, topic: Topic, on_change: C, on_error: E) -> Result<()>
    where
        C: Fn(Vec<Document>) + Send + Sync + 'static,
        E: Fn(Error) + Send + Sync + 'static,
    {
        if self.is_torn_down() {
            return Err(Error::ShutDown(topic));
        }
        let _guard = self.replace_lock.lock().await;

        if let Some((_, previous)) = self.active.remove(&topic) {
            self.release(topic, previous).await;
        }

        let mut watch = match self.backend.subscribe(topic).await {
            Ok(watch) => watch,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "subscribe failed");
                self.states.insert(topic, SubscriptionState::Failed);
                return Err(e);
            }
        };

        let watch_id = watch.id.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        // The task starts draining only once the subscription is recorded.
        let (start, started) = oneshot::channel::<()>();
        let task = {
            let cancelled = cancelled.clone();
            let states = self.states.clone();
            let active = self.active.clone();
            let watch_id = watch_id.clone();
            tokio::spawn(async move {
                if started.await.is_err() {
                    return;
                }
                while let Some(event) = watch.events.recv().await {
                    if cancelled.load(Ordering::SeqCst) {
                        return;
                    }
                    match event {
                        Ok(documents) => on_change(documents),
                        Err(error) => {
                            tracing::warn!(topic = %topic, error = %error, "subscription failed");
                            states.insert(topic, SubscriptionState::Failed);
                            active.remove_if(&topic, |_, a| a.watch_id == watch_id);
                            on_error(error);
                            return;
                        }
                    }
                }
                if !cancelled.load(Ordering::SeqCst) {
                    tracing::debug!(topic = %topic, "watch closed by store");
                    states.insert(topic, SubscriptionState::Unsubscribed);
                    active.remove_if(&topic, |_, a| a.watch_id == watch_id);
                }
            })
        };

        self.active.insert(
            topic,
            ActiveSubscription {
                watch_id: watch_id.clone(),
                cancelled,
                task,
            },
        );
        self.established.insert(topic);
        self.states.insert(topic, SubscriptionState::Subscribed);
        let _ = start.send(());
        tracing::info!(topic = %topic, watch_id = %watch_id, "subscribed");
        Ok(())
    }

    /// Cancel the subscription for `topic`. Returns whether one was live.
    pub async fn unsubscribe(&self, topic: Topic) -> bool {
        let _guard = self.replace_lock.lock().await;
        let removed = match self.active.remove(&topic) {
            Some((_, previous)) => {
                self.release(topic, previous).await;
                true
            }
            None => false,
        };
        if !self.is_torn_down() {
            self.states.insert(topic, SubscriptionState::Unsubscribed);
        }
        removed
    }

    /// Cancel everything. Later subscribes fail with `ShutDown`.
    pub async fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        let _guard = self.replace_lock.lock().await;
        let topics: Vec<Topic> = self.active.iter().map(|e| *e.key()).collect();
        for topic in topics {
            if let Some((_, previous)) = self.active.remove(&topic) {
                self.release(topic, previous).await;
            }
        }
        for topic in Topic::ALL {
            self.states.insert(topic, SubscriptionState::TornDown);
        }
        tracing::info!("subscriptions torn down");
    }

    async fn release(&self, topic: Topic, subscription: ActiveSubscription) {
        subscription.cancel();
        if let Err(e) = self.backend.unsubscribe(&subscription.watch_id).await {
            tracing::debug!(topic = %topic, error = %e, "unsubscribe failed");
        }
        tracing::debug!(topic = %topic, watch_id = %subscription.watch_id, "subscription released");
    }

    pub fn state(&self, topic: Topic) -> SubscriptionState {
        self.states
            .get(&topic)
            .map(|s| *s)
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    /// Whether `topic` was subscribed successfully at least once.
    pub fn ever_subscribed(&self, topic: Topic) -> bool {
        self.established.contains(&topic)
    }

    /// Topics with a live subscription, in stable order.
    pub fn active_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .states
            .iter()
            .filter(|e| *e.value() == SubscriptionState::Subscribed)
            .map(|e| *e.key())
            .collect();
        topics.sort();
        topics
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }
}
