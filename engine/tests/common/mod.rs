//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use armory_engine::store::FilterOp;
use armory_engine::{
    BackendKind, Document, DocumentId, Error, Fields, Item, ItemDraft, ManualClock, MemoryBackend,
    MoneyType, Query, Record, Result, StorageBackend, Storefront, SyncConfig, SyncEvent, Topic,
    Watch,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Wraps a [`MemoryBackend`], reports itself as remote, fails reads on
/// demand and can keep new weapons out of sight like a lagging replica.
pub struct FlakyBackend {
    pub inner: Arc<MemoryBackend>,
    read_failure: Mutex<Option<Error>>,
    /// Weapon reads that still miss a fresh insert; `None` when not lagging.
    lag_reads: Mutex<Option<usize>>,
    lagging: Mutex<HashSet<DocumentId>>,
    weapon_gets: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: MemoryBackend) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(inner),
            read_failure: Mutex::new(None),
            lag_reads: Mutex::new(None),
            lagging: Mutex::new(HashSet::new()),
            weapon_gets: AtomicUsize::new(0),
        })
    }

    /// Weapons inserted from now on stay invisible to the next `reads`
    /// point reads. `usize::MAX` hides them for good.
    pub fn lag_inserts(&self, reads: usize) {
        *self.lag_reads.lock() = Some(reads);
    }

    /// Point reads of the weapons collection so far.
    pub fn weapon_gets(&self) -> usize {
        self.weapon_gets.load(Ordering::SeqCst)
    }

    fn hides(&self, topic: Topic, id: &str) -> bool {
        if topic != Topic::Weapons || !self.lagging.lock().contains(id) {
            return false;
        }
        let mut remaining = self.lag_reads.lock();
        match remaining.as_mut() {
            Some(n) if *n > 0 => {
                *n = n.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    /// Every subsequent `get`/`query` fails with `error`.
    pub fn fail_reads(&self, error: Error) {
        *self.read_failure.lock() = Some(error);
    }

    pub fn heal(&self) {
        *self.read_failure.lock() = None;
    }

    fn check(&self) -> Result<()> {
        match self.read_failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn insert(&self, topic: Topic, fields: Fields) -> Result<DocumentId> {
        let id = self.inner.insert(topic, fields).await?;
        if topic == Topic::Weapons && self.lag_reads.lock().is_some() {
            self.lagging.lock().insert(id.clone());
        }
        Ok(id)
    }

    async fn get(&self, topic: Topic, id: &str) -> Result<Option<Document>> {
        self.check()?;
        if topic == Topic::Weapons {
            self.weapon_gets.fetch_add(1, Ordering::SeqCst);
        }
        if self.hides(topic, id) {
            return Ok(None);
        }
        self.inner.get(topic, id).await
    }

    async fn update(&self, topic: Topic, id: &str, fields: Fields) -> Result<()> {
        self.inner.update(topic, id, fields).await
    }

    async fn set(&self, topic: Topic, id: &str, fields: Fields) -> Result<()> {
        self.inner.set(topic, id, fields).await
    }

    async fn delete(&self, topic: Topic, id: &str) -> Result<()> {
        self.inner.delete(topic, id).await
    }

    async fn query(&self, topic: Topic, query: &Query) -> Result<Vec<Document>> {
        self.check()?;
        self.inner.query(topic, query).await
    }

    async fn increment(&self, topic: Topic, id: &str, field: &str, delta: f64) -> Result<f64> {
        self.inner.increment(topic, id, field, delta).await
    }

    fn supports_increment(&self) -> bool {
        self.inner.supports_increment()
    }

    async fn batch_delete(&self, topic: Topic, ids: &[DocumentId]) -> Result<usize> {
        self.inner.batch_delete(topic, ids).await
    }

    async fn subscribe(&self, topic: Topic) -> Result<Watch> {
        self.inner.subscribe(topic).await
    }

    async fn unsubscribe(&self, watch_id: &str) -> Result<()> {
        self.inner.unsubscribe(watch_id).await
    }
}

/// Fast verification so tests do not sleep.
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_verification(2, Duration::from_millis(1))
}

pub fn storefront(backend: Arc<dyn StorageBackend>) -> (Storefront, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let shop = Storefront::new(backend, clock.clone(), test_config());
    (shop, clock)
}

pub fn local_storefront() -> (Storefront, Arc<MemoryBackend>, Arc<ManualClock>) {
    let backend = MemoryBackend::shared();
    let (shop, clock) = storefront(backend.clone());
    (shop, backend, clock)
}

pub fn draft(name: &str, cost: f64, price: f64, quantity: u32) -> ItemDraft {
    ItemDraft::new(name, cost, price, quantity, MoneyType::Clean)
}

/// Insert a row directly, bypassing the coordinator.
pub async fn seed_item(
    backend: &dyn StorageBackend,
    name: &str,
    cost: f64,
    price: f64,
    quantity: u32,
    money_type: MoneyType,
) -> DocumentId {
    let item = ItemDraft::new(name, cost, price, quantity, money_type).into_item(String::new(), 1);
    backend
        .insert(Topic::Weapons, item.to_fields())
        .await
        .unwrap()
}

pub async fn items_named(backend: &dyn StorageBackend, name: &str) -> Vec<Item> {
    let docs = backend
        .query(
            Topic::Weapons,
            &Query::new().filter("name", FilterOp::Eq, name),
        )
        .await
        .unwrap();
    Item::decode_all(&docs)
}

/// Wait for the first event matching `pred`.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<SyncEvent>, mut pred: F) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `check` until it holds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
