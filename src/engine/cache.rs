//! Per-record instance cache.
//!
//! Resolved nodes are memoized per record so repeated reads of a current
//! state return the same instance. Entries key on record handle identity
//! and hold only a `Weak` reference to the record, so the cache never keeps
//! a record alive; dead entries are pruned on every access. Correctness
//! does not depend on that pruning: a transition always evicts its
//! record's entry explicitly.

use crate::core::StateNode;
use crate::store::{Record, RecordHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

struct Entry {
    record: Weak<Record>,
    node: Arc<StateNode>,
}

#[derive(Default)]
pub(crate) struct InstanceCache {
    entries: Mutex<HashMap<usize, Entry>>,
}

fn key(record: &RecordHandle) -> usize {
    Arc::as_ptr(record) as usize
}

impl InstanceCache {
    pub(crate) fn new() -> Self {
        InstanceCache::default()
    }

    pub(crate) fn get(&self, record: &RecordHandle) -> Option<Arc<StateNode>> {
        let mut entries = self.entries.lock().expect("instance cache lock poisoned");
        entries.retain(|_, entry| entry.record.strong_count() > 0);
        entries.get(&key(record)).map(|entry| entry.node.clone())
    }

    pub(crate) fn insert(&self, record: &RecordHandle, node: &Arc<StateNode>) {
        let mut entries = self.entries.lock().expect("instance cache lock poisoned");
        entries.insert(
            key(record),
            Entry {
                record: Arc::downgrade(record),
                node: node.clone(),
            },
        );
    }

    pub(crate) fn remove(&self, record: &RecordHandle) {
        let mut entries = self.entries.lock().expect("instance cache lock poisoned");
        entries.remove(&key(record));
    }
}
