use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

/// Per-record mutual exclusion, keyed by room or student id.
///
/// Keys are always taken in sorted order, so two callers locking
/// overlapping sets cannot deadlock.
#[derive(Default)]
pub(super) struct LockTable {
    slots: DashMap<Ulid, Arc<Mutex<()>>>,
}

/// Held locks; released on drop.
pub(super) struct LockSet {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockTable {
    pub(super) async fn acquire(&self, keys: &[Ulid]) -> LockSet {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let slot = self.slots.entry(key).or_default().clone();
            guards.push(slot.lock_owned().await);
        }
        LockSet { _guards: guards }
    }
}
