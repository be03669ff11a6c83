//! Group registry.
//!
//! Maps tier keys to groups and subscribers to the group they belong to.
//! Lock order is registry, then group membership. The registry lock is
//! never held across a catalog call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use leasewatch_id::{SubscriberId, TierKey};
use leasewatch_snapshot::Item;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::WatcherContext;
use crate::directory::SubscriberHandle;
use crate::error::{Result, WatcherError};
use crate::group::{Group, GroupStatus};

/// Registry construction options.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Seed for donor rotation. Groups draw from the OS RNG when unset.
    pub rng_seed: Option<u64>,
}

struct GroupEntry {
    group: Arc<Group>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    groups: HashMap<TierKey, GroupEntry>,
    assignments: HashMap<SubscriberId, TierKey>,
    groups_created: u64,
    stopped: bool,
}

struct Shared {
    ctx: Arc<WatcherContext>,
    options: RegistryOptions,
    inner: Mutex<Inner>,
}

/// Owner of all groups. Cheap to clone.
#[derive(Clone)]
pub struct GroupRegistry {
    shared: Arc<Shared>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new(ctx: Arc<WatcherContext>, options: RegistryOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                options,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Shared collaborators.
    pub fn context(&self) -> &Arc<WatcherContext> {
        &self.shared.ctx
    }

    /// Resolve the subscriber's tier and add it to that tier's group,
    /// creating the group on first use.
    ///
    /// On lookup failure nothing is changed: the subscriber keeps its
    /// notification flag and is not added anywhere.
    pub async fn register(&self, handle: SubscriberHandle) -> Result<TierKey> {
        let ctx = &self.shared.ctx;
        let (id, label, credential, previous_tier) = {
            let subscriber = handle.lock().await;
            (
                subscriber.id,
                subscriber.label(),
                subscriber.credential.clone(),
                subscriber.tier_key.clone(),
            )
        };

        let credential = credential.ok_or_else(|| {
            WatcherError::InvalidArgument("no credential set, use /login or /settoken".to_string())
        })?;

        let tier = match ctx.catalog.fetch_tier_info(&credential).await {
            Ok(tier) => tier,
            Err(e) => {
                if let Some(previous) = &previous_tier {
                    ctx.metrics.request_failed(&label, previous);
                }
                warn!(subscriber_id = %id, error = %e, "Registration abandoned, tier lookup failed");
                return Err(e.into());
            }
        };

        handle.lock().await.tier_key = Some(tier.clone());
        self.attach(id, handle, tier.clone()).await;
        self.persist().await;

        Ok(tier)
    }

    /// Remove the subscriber from its group. No-op if it has none.
    pub async fn unregister(&self, id: SubscriberId) {
        let mut inner = self.shared.inner.lock().await;
        if let Some(tier) = inner.assignments.remove(&id) {
            if let Some(entry) = inner.groups.get(&tier) {
                entry.group.remove_member(id).await;
            }
        }
    }

    /// Move a subscriber whose tier was just refreshed to `tier`'s group.
    pub async fn reallocate(&self, handle: SubscriberHandle, tier: TierKey) {
        let (id, label) = {
            let subscriber = handle.lock().await;
            (subscriber.id, subscriber.label())
        };
        self.attach(id, handle, tier.clone()).await;
        self.shared.ctx.metrics.subscriber_reallocated(&label, &tier);
        info!(subscriber_id = %id, tier = %tier, "Subscriber reallocated");
        self.persist().await;
    }

    async fn attach(&self, id: SubscriberId, handle: SubscriberHandle, tier: TierKey) {
        let mut inner = self.shared.inner.lock().await;

        if let Some(previous) = inner.assignments.get(&id).cloned() {
            if previous != tier {
                if let Some(entry) = inner.groups.get(&previous) {
                    entry.group.remove_member(id).await;
                }
            }
        }

        if !inner.groups.contains_key(&tier) {
            let entry = self.spawn_group(&mut inner, tier.clone());
            inner.groups.insert(tier.clone(), entry);
        }
        if let Some(entry) = inner.groups.get(&tier) {
            entry.group.add_member(id, handle).await;
        }
        inner.assignments.insert(id, tier);
    }

    fn spawn_group(&self, inner: &mut Inner, tier: TierKey) -> GroupEntry {
        let rng = match self.shared.options.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(inner.groups_created)),
            None => StdRng::from_os_rng(),
        };
        inner.groups_created += 1;

        let group = Arc::new(Group::new(tier.clone(), Arc::clone(&self.shared.ctx), rng));
        info!(tier = %tier, "Group created");

        if inner.stopped {
            return GroupEntry { group, task: None };
        }

        let task = tokio::spawn(Arc::clone(&group).run(self.clone()));
        GroupEntry {
            group,
            task: Some(task),
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.shared.ctx.directory.persist().await {
            warn!(error = %e, "Failed to persist subscribers");
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Keys of every group.
    pub async fn group_keys(&self) -> Vec<TierKey> {
        let mut keys: Vec<TierKey> = self.shared.inner.lock().await.groups.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// A group by key.
    pub async fn group(&self, tier: &TierKey) -> Option<Arc<Group>> {
        self.shared
            .inner
            .lock()
            .await
            .groups
            .get(tier)
            .map(|entry| Arc::clone(&entry.group))
    }

    async fn groups(&self) -> Vec<Arc<Group>> {
        self.shared
            .inner
            .lock()
            .await
            .groups
            .values()
            .map(|entry| Arc::clone(&entry.group))
            .collect()
    }

    /// Status of every group.
    pub async fn states(&self) -> BTreeMap<String, GroupStatus> {
        let mut states = BTreeMap::new();
        for group in self.groups().await {
            states.insert(group.key().to_string(), group.status().await);
        }
        states
    }

    /// Current items of every group.
    pub async fn items(&self) -> BTreeMap<String, Vec<Item>> {
        let mut items = BTreeMap::new();
        for group in self.groups().await {
            items.insert(group.key().to_string(), group.current_items().await);
        }
        items
    }

    /// The tier the registry has the subscriber assigned to.
    pub async fn membership_of(&self, id: SubscriberId) -> Option<TierKey> {
        self.shared.inner.lock().await.assignments.get(&id).cloned()
    }

    /// Keys of every group whose membership set contains `id`.
    pub async fn groups_containing(&self, id: SubscriberId) -> Vec<TierKey> {
        let mut keys = Vec::new();
        for group in self.groups().await {
            if group.contains(id).await {
                keys.push(group.key().clone());
            }
        }
        keys.sort();
        keys
    }

    /// Stop every group loop and wait for them to exit.
    pub async fn stop_all(&self) {
        let tasks: Vec<(TierKey, JoinHandle<()>)> = {
            let mut inner = self.shared.inner.lock().await;
            inner.stopped = true;
            inner
                .groups
                .iter_mut()
                .filter_map(|(key, entry)| {
                    entry.group.stop();
                    entry.task.take().map(|task| (key.clone(), task))
                })
                .collect()
        };

        for (key, task) in tasks {
            if let Err(e) = task.await {
                warn!(tier = %key, error = %e, "Group task failed");
            }
        }
        info!("All groups stopped");
    }
}
