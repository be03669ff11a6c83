//! Fully wired registry over fakes.

use std::sync::Arc;
use std::time::Duration;

use leasewatch_id::{ItemId, SubscriberId};
use leasewatch_render::TemplateEngine;
use leasewatch_snapshot::Item;
use leasewatch_watcher::delivery::DeliveryScheduler;
use leasewatch_watcher::directory::{SubscriberDirectory, SubscriberHandle};
use leasewatch_watcher::policy::RatePolicy;
use leasewatch_watcher::subscriber::Subscriber;
use leasewatch_watcher::{GroupRegistry, RegistryOptions, WatcherContext};

use crate::{MemoryStore, RecordingMetrics, RecordingTransport, ScriptedCatalog, TokioClock};

/// Seed used for donor rotation in the harness.
const RNG_SEED: u64 = 42;

/// Policy with short loop intervals.
///
/// Polls every minute, waits a second while idle or without a donor, and
/// delays ordinary deliveries by five minutes.
pub fn test_policy() -> RatePolicy {
    RatePolicy {
        idle_interval: Duration::from_secs(1),
        no_donor_backoff: Duration::from_secs(1),
        stop_check: Duration::from_secs(1),
        poll_interval: Duration::from_secs(60),
        outbound_delay: Duration::from_secs(5 * 60),
    }
}

/// An item with attributes.
pub fn item(id: &str, attributes: serde_json::Value) -> Item {
    let id = ItemId::new(id).unwrap_or_else(|e| panic!("invalid item id {id}: {e}"));
    Item::new(id, attributes)
}

/// Bare items with the given ids.
pub fn items(ids: &[&str]) -> Vec<Item> {
    ids.iter()
        .map(|id| item(id, serde_json::Value::Null))
        .collect()
}

/// A registry wired to in-memory fakes.
pub struct Harness {
    pub catalog: Arc<ScriptedCatalog>,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<RecordingMetrics>,
    pub clock: Arc<TokioClock>,
    pub directory: Arc<SubscriberDirectory>,
    pub deliveries: DeliveryScheduler,
    pub ctx: Arc<WatcherContext>,
    pub registry: GroupRegistry,
}

impl Harness {
    /// Create a harness with [`test_policy`].
    pub fn new() -> Self {
        Self::with_policy(test_policy())
    }

    /// Create a harness with a custom policy.
    pub fn with_policy(policy: RatePolicy) -> Self {
        let catalog = Arc::new(ScriptedCatalog::new());
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(RecordingMetrics::new());
        let clock = Arc::new(TokioClock::default());

        let directory = Arc::new(SubscriberDirectory::new(store.clone()));
        let deliveries = DeliveryScheduler::new(transport.clone(), metrics.clone());

        let ctx = Arc::new(WatcherContext {
            catalog: catalog.clone(),
            renderer: Arc::new(TemplateEngine::new()),
            metrics: metrics.clone(),
            clock: clock.clone(),
            directory: Arc::clone(&directory),
            deliveries: deliveries.clone(),
            policy,
            page_size: 100,
        });
        let registry = GroupRegistry::new(
            Arc::clone(&ctx),
            RegistryOptions {
                rng_seed: Some(RNG_SEED),
            },
        );

        Self {
            catalog,
            transport,
            store,
            metrics,
            clock,
            directory,
            deliveries,
            ctx,
            registry,
        }
    }

    /// Insert a consenting subscriber with notifications on, a zero
    /// throttle and `credential`. Not registered with any group.
    pub async fn subscriber(&self, id: i64, credential: &str) -> SubscriberHandle {
        let mut subscriber = Subscriber::new(SubscriberId::new(id), format!("user-{id}"));
        subscriber.eula_accepted = true;
        subscriber.notifications_enabled = true;
        subscriber.credential = Some(credential.to_string());
        subscriber.throttle = Duration::ZERO;
        self.insert(subscriber).await
    }

    /// Insert a subscriber record as given.
    pub async fn insert(&self, subscriber: Subscriber) -> SubscriberHandle {
        let (handle, _) = self.directory.get_or_insert(subscriber).await;
        handle
    }

    /// Insert a subscriber and register it.
    pub async fn registered(&self, id: i64, credential: &str) -> SubscriberHandle {
        let handle = self.subscriber(id, credential).await;
        if let Err(e) = self.registry.register(Arc::clone(&handle)).await {
            panic!("registering subscriber {id} failed: {e}");
        }
        handle
    }

    /// Stop every group and pending delivery.
    pub async fn shutdown(&self) {
        self.deliveries.shutdown();
        self.registry.stop_all().await;
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
