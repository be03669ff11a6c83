//! Subscriber records and per-subscriber update handling.

use std::time::Duration;

use chrono::{DateTime, Utc};
use leasewatch_id::{SubscriberId, TierKey};
use leasewatch_render::{compose_messages, filter_items, MessageOptions};
use leasewatch_snapshot::{Snapshot, UpdateFrame};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::WatcherContext;
use crate::delivery::DeliveryBatch;
use crate::directory::SubscriberHandle;

/// Throttle given to new subscribers.
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(15 * 60);

/// Summary template given to new subscribers.
pub const DEFAULT_SUMMARY_TEMPLATE: &str =
    "{{ len .previous }} -> {{ len .current }} (+{{ len .added }}, -{{ len .removed }})";

/// Detail template given to new subscribers.
pub const DEFAULT_DETAIL_TEMPLATE: &str = "{{ bold .id }}\n  PS: {{ default \"?\" .attributes.rentalObject.powerHP }}, Fuel: {{ default \"?\" .attributes.rentalObject.kindOfFuel }}";

/// Error recorded on a subscriber skipped for missing consent.
pub const EULA_NOT_ACCEPTED: &str = "EULA not accepted. Accept with /eula true";

/// A subscriber record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,

    #[serde(default)]
    pub friendly_name: String,

    /// Consent to having the credential used for shared polls.
    #[serde(default)]
    pub eula_accepted: bool,

    /// Donor credential for the catalog.
    #[serde(default)]
    pub credential: Option<String>,

    /// Tier reported by the catalog for `credential`. Only ever set from a
    /// catalog lookup.
    #[serde(default)]
    pub tier_key: Option<TierKey>,

    /// Exempt from the outbound delay and the throttle floor.
    #[serde(default)]
    pub is_privileged: bool,

    #[serde(default)]
    pub notifications_enabled: bool,

    /// Last reason notifications were disabled or a donor was skipped.
    #[serde(default)]
    pub watcher_error: Option<String>,

    /// Minimum time between two applied updates.
    #[serde(
        rename = "throttle_secs",
        default = "default_throttle",
        with = "duration_secs"
    )]
    pub throttle: Duration,

    #[serde(default = "default_summary_template")]
    pub summary_template: String,

    #[serde(default = "default_detail_template")]
    pub detail_template: String,

    #[serde(default)]
    pub ignore_details: bool,

    #[serde(default)]
    pub ignore_removed: bool,

    /// Filter expressions, see [`leasewatch_render::filter_items`].
    #[serde(default)]
    pub filters: Vec<String>,

    /// Last applied update. Persisted separately from the record.
    #[serde(skip)]
    pub last_frame: UpdateFrame,

    /// Publication time of the newest system notice delivered.
    #[serde(default)]
    pub last_system_notice: Option<DateTime<Utc>>,
}

fn default_throttle() -> Duration {
    DEFAULT_THROTTLE
}

fn default_summary_template() -> String {
    DEFAULT_SUMMARY_TEMPLATE.to_string()
}

fn default_detail_template() -> String {
    DEFAULT_DETAIL_TEMPLATE.to_string()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl Subscriber {
    /// Create a record for a first contact.
    pub fn new(id: SubscriberId, friendly_name: impl Into<String>) -> Self {
        Self {
            id,
            friendly_name: friendly_name.into(),
            eula_accepted: false,
            credential: None,
            tier_key: None,
            is_privileged: false,
            notifications_enabled: false,
            watcher_error: None,
            throttle: DEFAULT_THROTTLE,
            summary_template: default_summary_template(),
            detail_template: default_detail_template(),
            ignore_details: false,
            ignore_removed: false,
            filters: Vec::new(),
            last_frame: UpdateFrame::empty(),
            last_system_notice: None,
        }
    }

    /// Metrics and log label.
    pub fn label(&self) -> String {
        if self.friendly_name.is_empty() {
            self.id.to_string()
        } else {
            self.friendly_name.clone()
        }
    }

    /// Returns true if an update at `now` falls inside the throttle window
    /// of the last applied update.
    pub fn is_throttled(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_frame.captured_at else {
            return false;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed < self.throttle,
            // Clock went backwards. Treat as inside the window.
            Err(_) => !self.throttle.is_zero(),
        }
    }

    /// Disable notifications and record why.
    pub fn disable(&mut self, reason: impl Into<String>) {
        self.notifications_enabled = false;
        self.watcher_error = Some(reason.into());
    }

    /// Composition settings for this subscriber.
    pub fn message_options(&self) -> MessageOptions<'_> {
        MessageOptions {
            summary_template: &self.summary_template,
            detail_template: &self.detail_template,
            ignore_details: self.ignore_details,
            ignore_removed: self.ignore_removed,
        }
    }
}

// =============================================================================
// Update
// =============================================================================

/// What [`apply_update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Inside the throttle window. Nothing was touched.
    Throttled,
    /// The frame advanced without changes.
    Unchanged,
    /// The frame advanced with changes; `scheduled` messages were queued.
    Changed { scheduled: usize },
}

/// Apply a group snapshot to one subscriber.
///
/// A throttled call returns without computing a diff or mutating the
/// record. Otherwise the subscriber's filters are applied, the frame
/// advances and notifications are scheduled when something changed. The
/// caller persists the directory. Render failures are logged and do not
/// prevent the frame from advancing.
pub async fn apply_update(
    ctx: &WatcherContext,
    handle: &SubscriberHandle,
    snapshot: &Snapshot,
) -> UpdateOutcome {
    let now = ctx.clock.now();

    let mut subscriber = handle.lock().await;

    if subscriber.is_throttled(now) {
        debug!(
            subscriber_id = %subscriber.id,
            throttle_secs = subscriber.throttle.as_secs(),
            "Update dropped by throttle"
        );
        return UpdateOutcome::Throttled;
    }

    let label = subscriber.label();
    let items = filter_items(ctx.renderer.as_ref(), &snapshot.items, &subscriber.filters);
    ctx.metrics
        .subscriber_items(&label, snapshot.len(), items.len());

    let frame = subscriber.last_frame.advance(items, snapshot.captured_at);
    debug!(
        subscriber_id = %subscriber.id,
        added = frame.added.len(),
        removed = frame.removed.len(),
        "Computed update"
    );

    let outcome = if frame.has_changes {
        match compose_messages(ctx.renderer.as_ref(), &frame, &subscriber.message_options()) {
            Ok(messages) => {
                let scheduled = messages.len();
                let delay = if subscriber.is_privileged {
                    Duration::ZERO
                } else {
                    ctx.policy.outbound_delay
                };
                ctx.deliveries.schedule(DeliveryBatch {
                    to: subscriber.id,
                    label,
                    messages,
                    delay,
                });
                UpdateOutcome::Changed { scheduled }
            }
            Err(e) => {
                warn!(subscriber_id = %subscriber.id, error = %e, "Failed to render notification");
                UpdateOutcome::Changed { scheduled: 0 }
            }
        }
    } else {
        UpdateOutcome::Unchanged
    };

    subscriber.last_frame = frame;
    outcome
}
