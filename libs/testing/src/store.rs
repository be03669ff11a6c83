//! In-memory subscriber store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use leasewatch_id::SubscriberId;
use leasewatch_watcher::store::{StoreError, SubscriberStore};
use leasewatch_watcher::subscriber::Subscriber;

use crate::lock;

/// Store backed by a map. Frames are kept, unlike the SQLite layout which
/// stores them in their own table.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<SubscriberId, Subscriber>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored copy of a subscriber.
    pub fn saved(&self, id: SubscriberId) -> Option<Subscriber> {
        lock(&self.records).get(&id).cloned()
    }

    /// Number of `save_all` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SubscriberStore for MemoryStore {
    fn load_all(&self) -> Result<HashMap<SubscriberId, Subscriber>, StoreError> {
        Ok(lock(&self.records).clone())
    }

    fn save_all(&self, subscribers: &HashMap<SubscriberId, Subscriber>) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        lock(&self.records).extend(subscribers.iter().map(|(id, s)| (*id, s.clone())));
        Ok(())
    }
}
