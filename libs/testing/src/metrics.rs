//! Recording metrics sink.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use leasewatch_id::TierKey;
use leasewatch_watcher::metrics::Metrics;

use crate::lock;

#[derive(Default)]
struct Counters {
    requests: HashMap<String, u64>,
    failures: HashMap<String, u64>,
    group_items: HashMap<String, usize>,
    subscriber_items: HashMap<String, (usize, usize)>,
    messages: HashMap<String, usize>,
    reallocations: HashMap<String, Vec<String>>,
}

/// Metrics sink that keeps every value in memory.
#[derive(Default)]
pub struct RecordingMetrics {
    counters: Mutex<Counters>,
}

impl RecordingMetrics {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog requests started for `tier`.
    pub fn requests(&self, tier: &str) -> u64 {
        lock(&self.counters).requests.get(tier).copied().unwrap_or(0)
    }

    /// Failed catalog requests for `tier`.
    pub fn failures(&self, tier: &str) -> u64 {
        lock(&self.counters).failures.get(tier).copied().unwrap_or(0)
    }

    /// Last reported group item count.
    pub fn group_items(&self, tier: &str) -> Option<usize> {
        lock(&self.counters).group_items.get(tier).copied()
    }

    /// Last reported visible and of-interest counts for a subscriber label.
    pub fn subscriber_items(&self, subscriber: &str) -> Option<(usize, usize)> {
        lock(&self.counters).subscriber_items.get(subscriber).copied()
    }

    /// Target tiers of every reallocation of a subscriber label, in order.
    pub fn reallocations(&self, subscriber: &str) -> Vec<String> {
        lock(&self.counters)
            .reallocations
            .get(subscriber)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages sent to a subscriber label.
    pub fn messages_sent(&self, subscriber: &str) -> usize {
        lock(&self.counters).messages.get(subscriber).copied().unwrap_or(0)
    }
}

impl Metrics for RecordingMetrics {
    fn request_started(&self, _subscriber: &str, tier: &TierKey) {
        *lock(&self.counters)
            .requests
            .entry(tier.to_string())
            .or_default() += 1;
    }

    fn request_failed(&self, _subscriber: &str, tier: &TierKey) {
        *lock(&self.counters)
            .failures
            .entry(tier.to_string())
            .or_default() += 1;
    }

    fn request_duration(&self, _subscriber: &str, _tier: &TierKey, _duration: Duration) {}

    fn group_items_visible(&self, tier: &TierKey, count: usize) {
        lock(&self.counters)
            .group_items
            .insert(tier.to_string(), count);
    }

    fn subscriber_items(&self, subscriber: &str, visible: usize, of_interest: usize) {
        lock(&self.counters)
            .subscriber_items
            .insert(subscriber.to_string(), (visible, of_interest));
    }

    fn messages_sent(&self, subscriber: &str, count: usize) {
        *lock(&self.counters)
            .messages
            .entry(subscriber.to_string())
            .or_default() += count;
    }

    fn subscriber_reallocated(&self, subscriber: &str, tier: &TierKey) {
        lock(&self.counters)
            .reallocations
            .entry(subscriber.to_string())
            .or_default()
            .push(tier.to_string());
    }
}
