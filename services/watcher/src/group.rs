//! Tier groups.
//!
//! A group owns the members that share one tier key and runs a single loop
//! for them:
//!
//! ```text
//! Idle ──members──▶ SelectingDonor ──donor──▶ Polling ──ok──▶ FanningOut
//!  ▲                   │ none                    │ error          │
//!  │                   ▼                         ▼                ▼
//!  └──────────────── backoff ◀──────────────── Sleeping ◀─────────┘
//! ```
//!
//! Donor candidates are visited in a shuffled order so the same
//! credential is not always used. Fan-out to every member of one cycle
//! completes before the next donor selection starts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use leasewatch_id::{SubscriberId, TierKey};
use leasewatch_snapshot::{Item, Snapshot};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::context::WatcherContext;
use crate::directory::SubscriberHandle;
use crate::policy::SleepOutcome;
use crate::registry::GroupRegistry;
use crate::subscriber::{apply_update, UpdateOutcome, EULA_NOT_ACCEPTED};

/// Where a group loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    #[default]
    Idle,
    SelectingDonor,
    Polling,
    FanningOut,
    Sleeping,
    Stopped,
}

/// State of the last or in-flight poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollStatus {
    pub start_time: Option<DateTime<Utc>>,
    pub active: bool,
    pub duration_ms: Option<u64>,
}

/// Observable state of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    pub member_count: usize,
    pub item_count: usize,
    pub poll: PollStatus,
    pub phase: GroupPhase,

    /// Whether the loop is running.
    pub active: bool,
}

/// The member whose credential is used for one poll.
struct Donor {
    id: SubscriberId,
    handle: SubscriberHandle,
    label: String,
    credential: String,
}

/// Decision about a donor candidate, taken under its lock.
enum Screening {
    Skip,
    SkipAndPersist,
    Refresh { label: String, credential: String },
}

type FanOutRequest = (Snapshot, oneshot::Sender<()>);

/// One tier group.
pub struct Group {
    key: TierKey,
    ctx: Arc<WatcherContext>,
    members: RwLock<BTreeMap<SubscriberId, SubscriberHandle>>,
    status: RwLock<GroupStatus>,
    current: RwLock<Option<Snapshot>>,
    stop_tx: watch::Sender<bool>,
    rng: Mutex<StdRng>,
}

impl Group {
    /// Create a new group. The loop is started with [`Group::run`].
    pub fn new(key: TierKey, ctx: Arc<WatcherContext>, rng: StdRng) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            key,
            ctx,
            members: RwLock::new(BTreeMap::new()),
            status: RwLock::new(GroupStatus::default()),
            current: RwLock::new(None),
            stop_tx,
            rng: Mutex::new(rng),
        }
    }

    /// The group's tier key.
    pub fn key(&self) -> &TierKey {
        &self.key
    }

    /// Current observable state.
    pub async fn status(&self) -> GroupStatus {
        self.status.read().await.clone()
    }

    /// Items of the last successful poll.
    pub async fn current_items(&self) -> Vec<Item> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|snapshot| snapshot.items.clone())
            .unwrap_or_default()
    }

    /// Ids of all members.
    pub async fn member_ids(&self) -> Vec<SubscriberId> {
        self.members.read().await.keys().copied().collect()
    }

    /// Returns true if `id` is a member.
    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.members.read().await.contains_key(&id)
    }

    /// Number of members.
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub(crate) async fn add_member(&self, id: SubscriberId, handle: SubscriberHandle) {
        let count = {
            let mut members = self.members.write().await;
            members.insert(id, handle);
            members.len()
        };
        self.status.write().await.member_count = count;
        info!(tier = %self.key, subscriber_id = %id, member_count = count, "Member added");
    }

    pub(crate) async fn remove_member(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut members = self.members.write().await;
            let removed = members.remove(&id).is_some();
            (removed, members.len())
        };
        if removed {
            self.status.write().await.member_count = count;
            info!(tier = %self.key, subscriber_id = %id, member_count = count, "Member removed");
        }
        removed
    }

    /// Ask the loop to stop. It exits within one stop-check tick.
    ///
    /// The flag is stored even when the loop has not subscribed yet.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    async fn set_phase(&self, phase: GroupPhase) {
        self.status.write().await.phase = phase;
    }

    async fn member_list(&self) -> Vec<(SubscriberId, SubscriberHandle)> {
        self.members
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect()
    }

    // =========================================================================
    // Loop
    // =========================================================================

    /// Run the group loop until stopped.
    pub(crate) async fn run(self: Arc<Self>, registry: GroupRegistry) {
        info!(tier = %self.key, "Group loop started");
        self.status.write().await.active = true;

        let mut stop = self.stop_tx.subscribe();
        let policy = self.ctx.policy.clone();

        let (fan_out_tx, fan_out_rx) = mpsc::channel::<FanOutRequest>(1);
        let fan_out_task = tokio::spawn(Arc::clone(&self).fan_out_loop(registry.clone(), fan_out_rx));

        loop {
            if *stop.borrow() {
                break;
            }

            let members = self.member_list().await;
            if members.is_empty() {
                self.set_phase(GroupPhase::Idle).await;
                debug!(tier = %self.key, "No members, idling");
                if policy.sleep(policy.idle_interval, &mut stop).await == SleepOutcome::Stopped {
                    break;
                }
                continue;
            }

            self.set_phase(GroupPhase::SelectingDonor).await;
            let Some(donor) = self.select_donor(&registry, members).await else {
                let member_count = self.member_count().await;
                info!(tier = %self.key, member_count, "Could not select donor");
                if policy.sleep(policy.no_donor_backoff, &mut stop).await == SleepOutcome::Stopped {
                    break;
                }
                continue;
            };

            self.set_phase(GroupPhase::Polling).await;
            if let Some(snapshot) = self.poll(&donor).await {
                self.set_phase(GroupPhase::FanningOut).await;
                let (ack_tx, ack_rx) = oneshot::channel();
                if fan_out_tx.send((snapshot, ack_tx)).await.is_err() {
                    warn!(tier = %self.key, "Fan-out task gone");
                    break;
                }
                let _ = ack_rx.await;
            }

            self.set_phase(GroupPhase::Sleeping).await;
            debug!(
                tier = %self.key,
                sleep_secs = policy.poll_interval.as_secs(),
                "Sleeping until next poll"
            );
            if policy.sleep(policy.poll_interval, &mut stop).await == SleepOutcome::Stopped {
                break;
            }
        }

        drop(fan_out_tx);
        let _ = fan_out_task.await;

        {
            let mut status = self.status.write().await;
            status.phase = GroupPhase::Stopped;
            status.active = false;
        }
        info!(tier = %self.key, "Group loop stopped");
    }

    /// Pick the first qualifying member in shuffled order.
    async fn select_donor(
        &self,
        registry: &GroupRegistry,
        members: Vec<(SubscriberId, SubscriberHandle)>,
    ) -> Option<Donor> {
        let mut order: Vec<usize> = (0..members.len()).collect();
        order.shuffle(&mut *self.rng.lock().await);

        for index in order {
            let (id, handle) = &members[index];

            let screening = {
                let mut subscriber = handle.lock().await;
                if !subscriber.notifications_enabled {
                    Screening::Skip
                } else if !subscriber.eula_accepted {
                    if subscriber.watcher_error.as_deref() == Some(EULA_NOT_ACCEPTED) {
                        Screening::Skip
                    } else {
                        subscriber.watcher_error = Some(EULA_NOT_ACCEPTED.to_string());
                        Screening::SkipAndPersist
                    }
                } else {
                    match subscriber.credential.clone() {
                        Some(credential) => Screening::Refresh {
                            label: subscriber.label(),
                            credential,
                        },
                        None => {
                            subscriber.disable("no credential set");
                            Screening::SkipAndPersist
                        }
                    }
                }
            };

            let (label, credential) = match screening {
                Screening::Skip => continue,
                Screening::SkipAndPersist => {
                    self.persist().await;
                    continue;
                }
                Screening::Refresh { label, credential } => (label, credential),
            };

            let refreshed = self.ctx.catalog.fetch_tier_info(&credential).await;

            let refreshed = {
                let mut subscriber = handle.lock().await;
                // The credential may have been replaced while the lookup ran
                if subscriber.credential.as_deref() != Some(credential.as_str()) {
                    debug!(tier = %self.key, subscriber_id = %id, "Credential replaced during tier refresh");
                    continue;
                }
                match refreshed {
                    Ok(tier) => {
                        let changed = subscriber.tier_key.as_ref() != Some(&tier);
                        subscriber.tier_key = Some(tier.clone());
                        Ok((tier, changed))
                    }
                    Err(e) => {
                        if e.is_unauthorized() {
                            subscriber.disable(e.to_string());
                        }
                        Err(e)
                    }
                }
            };

            let (tier, changed) = match refreshed {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    self.ctx.metrics.request_failed(&label, &self.key);
                    warn!(tier = %self.key, subscriber_id = %id, error = %e, "Tier refresh failed");
                    if e.is_unauthorized() {
                        self.persist().await;
                    }
                    continue;
                }
            };

            if tier != self.key {
                info!(
                    tier = %self.key,
                    subscriber_id = %id,
                    new_tier = %tier,
                    "Donor candidate changed tier, reallocating"
                );
                registry.reallocate(Arc::clone(handle), tier).await;
                continue;
            }
            if changed {
                self.persist().await;
            }

            info!(tier = %self.key, subscriber_id = %id, "Using donor");
            return Some(Donor {
                id: *id,
                handle: Arc::clone(handle),
                label,
                credential,
            });
        }

        None
    }

    /// Fetch the catalog with the donor's credential.
    async fn poll(&self, donor: &Donor) -> Option<Snapshot> {
        let ctx = &self.ctx;
        ctx.metrics.request_started(&donor.label, &self.key);

        let started = Instant::now();
        self.status.write().await.poll = PollStatus {
            start_time: Some(ctx.clock.now()),
            active: true,
            duration_ms: None,
        };

        let result = ctx
            .catalog
            .fetch_all(&donor.credential, 0, ctx.page_size)
            .await;

        let elapsed = started.elapsed();
        {
            let mut status = self.status.write().await;
            status.poll.active = false;
            status.poll.duration_ms = Some(elapsed.as_millis() as u64);
        }
        ctx.metrics
            .request_duration(&donor.label, &self.key, elapsed);

        match result {
            Ok(items) => {
                let snapshot = Snapshot::new(items, ctx.clock.now());
                info!(tier = %self.key, item_count = snapshot.len(), "Poll finished");
                ctx.metrics.group_items_visible(&self.key, snapshot.len());

                *self.current.write().await = Some(snapshot.clone());
                self.status.write().await.item_count = snapshot.len();
                Some(snapshot)
            }
            Err(e) => {
                ctx.metrics.request_failed(&donor.label, &self.key);
                warn!(
                    tier = %self.key,
                    subscriber_id = %donor.id,
                    error = %e,
                    "Poll failed, keeping previous snapshot"
                );
                if e.is_unauthorized() {
                    let disabled = {
                        let mut subscriber = donor.handle.lock().await;
                        let current = subscriber.credential.as_deref() == Some(donor.credential.as_str());
                        if current {
                            subscriber.disable(e.to_string());
                        }
                        current
                    };
                    if disabled {
                        self.persist().await;
                    }
                }
                None
            }
        }
    }

    async fn fan_out_loop(self: Arc<Self>, registry: GroupRegistry, mut rx: mpsc::Receiver<FanOutRequest>) {
        while let Some((snapshot, ack)) = rx.recv().await {
            self.fan_out(&registry, &snapshot).await;
            let _ = ack.send(());
        }
    }

    /// Hand `snapshot` to every enabled member still on this tier, then
    /// persist once if any member advanced.
    async fn fan_out(&self, registry: &GroupRegistry, snapshot: &Snapshot) {
        let mut advanced = false;
        for (id, handle) in self.member_list().await {
            let (enabled, tier) = {
                let subscriber = handle.lock().await;
                (subscriber.notifications_enabled, subscriber.tier_key.clone())
            };

            match tier {
                Some(tier) if tier != self.key => {
                    info!(
                        tier = %self.key,
                        subscriber_id = %id,
                        new_tier = %tier,
                        "Member changed tier, reallocating"
                    );
                    registry.reallocate(handle, tier).await;
                }
                _ if enabled => {
                    let outcome = apply_update(&self.ctx, &handle, snapshot).await;
                    advanced |= outcome != UpdateOutcome::Throttled;
                }
                _ => {}
            }
        }

        if advanced {
            self.persist().await;
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.ctx.directory.persist().await {
            warn!(tier = %self.key, error = %e, "Failed to persist subscribers");
        }
    }
}
