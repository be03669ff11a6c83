//! In-memory subscriber directory backed by a [`SubscriberStore`].
//!
//! Every record lives behind its own lock. Callers must release any
//! subscriber lock before calling [`SubscriberDirectory::persist`], which
//! locks each record in turn to take a consistent copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use leasewatch_id::SubscriberId;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::store::{StoreError, SubscriberStore};
use crate::subscriber::Subscriber;

/// Shared handle to one subscriber record.
pub type SubscriberHandle = Arc<Mutex<Subscriber>>;

/// All known subscribers.
pub struct SubscriberDirectory {
    store: Arc<dyn SubscriberStore>,
    records: RwLock<BTreeMap<SubscriberId, SubscriberHandle>>,
    persist_lock: Mutex<()>,
}

impl SubscriberDirectory {
    /// Create an empty directory.
    pub fn new(store: Arc<dyn SubscriberStore>) -> Self {
        Self {
            store,
            records: RwLock::new(BTreeMap::new()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Create a directory populated from the store.
    pub async fn load(store: Arc<dyn SubscriberStore>) -> Result<Self, StoreError> {
        let loaded = {
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || store.load_all())
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))??
        };

        info!(count = loaded.len(), "Loaded subscriber directory");

        let records = loaded
            .into_iter()
            .map(|(id, subscriber)| (id, Arc::new(Mutex::new(subscriber))))
            .collect();

        Ok(Self {
            store,
            records: RwLock::new(records),
            persist_lock: Mutex::new(()),
        })
    }

    /// Look up a subscriber.
    pub async fn get(&self, id: SubscriberId) -> Option<SubscriberHandle> {
        self.records.read().await.get(&id).cloned()
    }

    /// Insert `subscriber` unless a record with its id exists. Returns the
    /// stored handle and whether it was newly created.
    pub async fn get_or_insert(&self, subscriber: Subscriber) -> (SubscriberHandle, bool) {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&subscriber.id) {
            return (Arc::clone(existing), false);
        }

        let id = subscriber.id;
        let handle = Arc::new(Mutex::new(subscriber));
        records.insert(id, Arc::clone(&handle));
        debug!(subscriber_id = %id, "Subscriber created");
        (handle, true)
    }

    /// Every subscriber handle, ordered by id.
    pub async fn all(&self) -> Vec<SubscriberHandle> {
        self.records.read().await.values().cloned().collect()
    }

    /// Subscribers whose notifications are enabled.
    pub async fn enabled(&self) -> Vec<SubscriberHandle> {
        let mut enabled = Vec::new();
        for handle in self.all().await {
            if handle.lock().await.notifications_enabled {
                enabled.push(handle);
            }
        }
        enabled
    }

    /// Number of known subscribers.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if no subscriber is known.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Write every record to the store.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.persist_lock.lock().await;

        let handles = self.all().await;
        let mut snapshot = HashMap::with_capacity(handles.len());
        for handle in handles {
            let subscriber = handle.lock().await.clone();
            snapshot.insert(subscriber.id, subscriber);
        }

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save_all(&snapshot))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}
