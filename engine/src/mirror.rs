//! Local mirror of the weapons collection.
//!
//! The mirror is a disposable cache: the remote store is always the source
//! of truth. It only ever changes by swapping the whole sequence, so a
//! reader sees either the previous snapshot or the next one, never a mix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::Item;

/// In-memory copy of the last known weapons snapshot.
#[derive(Debug, Default)]
pub struct LocalMirror {
    items: RwLock<Arc<Vec<Item>>>,
    generation: AtomicU64,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Atomically replace the whole sequence.
    pub fn replace_all(&self, items: Vec<Item>) {
        let mut guard = self.items.write();
        *guard = Arc::new(items);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(generation, len = guard.len(), "mirror replaced");
    }

    /// Current contents, without remote I/O.
    pub fn snapshot(&self) -> Arc<Vec<Item>> {
        self.items.read().clone()
    }

    pub fn clear(&self) {
        self.replace_all(Vec::new());
    }

    /// Number of swaps so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ItemDraft, MoneyType};
    use proptest::prelude::*;

    fn item(id: &str, qty: u32) -> Item {
        ItemDraft::new(format!("item-{id}"), 1.0, 2.0, qty, MoneyType::Clean)
            .into_item(id.to_string(), 0)
    }

    #[test]
    fn starts_empty() {
        let mirror = LocalMirror::new();
        assert!(mirror.is_empty());
        assert_eq!(mirror.generation(), 0);
    }

    #[test]
    fn replace_discards_previous_entries() {
        let mirror = LocalMirror::new();
        mirror.replace_all(vec![item("a", 1), item("b", 2)]);
        mirror.replace_all(vec![item("c", 3)]);

        let snapshot = mirror.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "c");
        assert_eq!(mirror.generation(), 2);
    }

    #[test]
    fn old_snapshots_stay_intact() {
        let mirror = LocalMirror::new();
        mirror.replace_all(vec![item("a", 1)]);
        let before = mirror.snapshot();
        mirror.clear();
        assert_eq!(before.len(), 1);
        assert!(mirror.is_empty());
    }

    proptest! {
        #[test]
        fn snapshot_equals_last_replacement(
            batches in prop::collection::vec(
                prop::collection::vec(("[a-z]{1,6}", 0u32..50), 0..8),
                1..10,
            )
        ) {
            let mirror = LocalMirror::new();
            let mut last = Vec::new();
            for batch in &batches {
                last = batch.iter().map(|(id, qty)| item(id, *qty)).collect::<Vec<_>>();
                mirror.replace_all(last.clone());
            }
            let snapshot = mirror.snapshot();
            prop_assert_eq!(snapshot.as_ref(), &last);
            prop_assert_eq!(mirror.generation(), batches.len() as u64);
        }
    }
}
