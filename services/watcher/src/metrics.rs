//! Metrics sink.
//!
//! The core writes to a [`Metrics`] implementation and never inspects the
//! result. [`PrometheusMetrics`] backs the `/metrics` endpoint.

use std::time::Duration;

use leasewatch_id::TierKey;
use prometheus::{GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Fire-and-forget metrics sink.
pub trait Metrics: Send + Sync {
    /// A catalog request was sent on behalf of `subscriber`.
    fn request_started(&self, subscriber: &str, tier: &TierKey);

    /// A catalog request failed.
    fn request_failed(&self, subscriber: &str, tier: &TierKey);

    /// Duration of the last catalog poll.
    fn request_duration(&self, subscriber: &str, tier: &TierKey, duration: Duration);

    /// Items in the group's current snapshot.
    fn group_items_visible(&self, tier: &TierKey, count: usize);

    /// Items seen by a subscriber before and after its filters.
    fn subscriber_items(&self, subscriber: &str, visible: usize, of_interest: usize);

    /// Messages handed to the transport for a subscriber.
    fn messages_sent(&self, subscriber: &str, count: usize);

    /// A subscriber was moved to the group for `tier`.
    fn subscriber_reallocated(&self, subscriber: &str, tier: &TierKey);
}

/// Metrics sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn request_started(&self, _subscriber: &str, _tier: &TierKey) {}
    fn request_failed(&self, _subscriber: &str, _tier: &TierKey) {}
    fn request_duration(&self, _subscriber: &str, _tier: &TierKey, _duration: Duration) {}
    fn group_items_visible(&self, _tier: &TierKey, _count: usize) {}
    fn subscriber_items(&self, _subscriber: &str, _visible: usize, _of_interest: usize) {}
    fn messages_sent(&self, _subscriber: &str, _count: usize) {}
    fn subscriber_reallocated(&self, _subscriber: &str, _tier: &TierKey) {}
}

/// Prometheus-backed metrics with their own registry.
pub struct PrometheusMetrics {
    registry: Registry,
    requests: IntCounterVec,
    request_errors: IntCounterVec,
    request_duration: GaugeVec,
    group_items: IntGaugeVec,
    items_visible: IntGaugeVec,
    items_of_interest: IntGaugeVec,
    messages_sent: IntCounterVec,
    reallocations: IntCounterVec,
}

impl PrometheusMetrics {
    /// Create and register all collectors.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("lw_requests_total", "Catalog requests sent"),
            &["subscriber", "tier"],
        )?;
        let request_errors = IntCounterVec::new(
            Opts::new("lw_request_errors_total", "Catalog requests that returned an error"),
            &["subscriber", "tier"],
        )?;
        let request_duration = GaugeVec::new(
            Opts::new("lw_request_duration_ms", "Duration of the last catalog poll in ms"),
            &["subscriber", "tier"],
        )?;
        let group_items = IntGaugeVec::new(
            Opts::new("lw_items_visible_to_group", "Items visible to the tier group"),
            &["tier"],
        )?;
        let items_visible = IntGaugeVec::new(
            Opts::new("lw_items_visible", "Items visible to the subscriber"),
            &["subscriber"],
        )?;
        let items_of_interest = IntGaugeVec::new(
            Opts::new("lw_items_of_interest", "Items left after the subscriber's filters"),
            &["subscriber"],
        )?;
        let messages_sent = IntCounterVec::new(
            Opts::new("lw_messages_sent_total", "Messages sent to the subscriber"),
            &["subscriber"],
        )?;

        let reallocations = IntCounterVec::new(
            Opts::new("lw_reallocations_total", "Subscribers moved to another tier group"),
            &["subscriber", "tier"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(request_errors.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(group_items.clone()))?;
        registry.register(Box::new(items_visible.clone()))?;
        registry.register(Box::new(items_of_interest.clone()))?;
        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(reallocations.clone()))?;

        Ok(Self {
            registry,
            requests,
            request_errors,
            request_duration,
            group_items,
            items_visible,
            items_of_interest,
            messages_sent,
            reallocations,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

impl Metrics for PrometheusMetrics {
    fn request_started(&self, subscriber: &str, tier: &TierKey) {
        self.requests
            .with_label_values(&[subscriber, tier.as_str()])
            .inc();
    }

    fn request_failed(&self, subscriber: &str, tier: &TierKey) {
        self.request_errors
            .with_label_values(&[subscriber, tier.as_str()])
            .inc();
    }

    fn request_duration(&self, subscriber: &str, tier: &TierKey, duration: Duration) {
        self.request_duration
            .with_label_values(&[subscriber, tier.as_str()])
            .set(duration.as_secs_f64() * 1000.0);
    }

    fn group_items_visible(&self, tier: &TierKey, count: usize) {
        self.group_items
            .with_label_values(&[tier.as_str()])
            .set(count as i64);
    }

    fn subscriber_items(&self, subscriber: &str, visible: usize, of_interest: usize) {
        self.items_visible
            .with_label_values(&[subscriber])
            .set(visible as i64);
        self.items_of_interest
            .with_label_values(&[subscriber])
            .set(of_interest as i64);
    }

    fn messages_sent(&self, subscriber: &str, count: usize) {
        self.messages_sent
            .with_label_values(&[subscriber])
            .inc_by(count as u64);
    }

    fn subscriber_reallocated(&self, subscriber: &str, tier: &TierKey) {
        self.reallocations
            .with_label_values(&[subscriber, tier.as_str()])
            .inc();
    }
}
