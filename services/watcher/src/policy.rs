//! Sleep and retry timing shared by all groups.
//!
//! Every interval here is constant. A failed poll is retried after the
//! regular poll interval; there is no exponential growth.

use std::time::Duration;

use tokio::sync::watch;

use crate::config::Config;

/// Timing configuration for group loops and deliveries.
#[derive(Debug, Clone)]
pub struct RatePolicy {
    /// Recheck interval while a group has no members.
    pub idle_interval: Duration,

    /// Retry interval when no member qualifies as donor.
    pub no_donor_backoff: Duration,

    /// Granularity at which long sleeps check the stop signal.
    pub stop_check: Duration,

    /// Sleep between two polls of the same group.
    pub poll_interval: Duration,

    /// Delay before an ordinary subscriber's notifications are sent.
    pub outbound_delay: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(30),
            no_donor_backoff: Duration::from_secs(5),
            stop_check: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5 * 60),
            outbound_delay: Duration::from_secs(5 * 60),
        }
    }
}

/// How an interruptible sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed.
    Elapsed,
    /// The stop signal fired first.
    Stopped,
}

impl RatePolicy {
    /// Build the policy from service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_mins * 60),
            outbound_delay: Duration::from_secs(config.outbound_delay_secs),
            ..Self::default()
        }
    }

    /// Sleep for `duration` in steps of at most `stop_check`, returning
    /// early once `stop` reads true or its sender is gone.
    pub async fn sleep(&self, duration: Duration, stop: &mut watch::Receiver<bool>) -> SleepOutcome {
        let step = self.stop_check.max(Duration::from_millis(1));
        let mut remaining = duration;

        loop {
            if *stop.borrow() {
                return SleepOutcome::Stopped;
            }
            if remaining.is_zero() {
                return SleepOutcome::Elapsed;
            }

            let tick = remaining.min(step);
            tokio::select! {
                _ = tokio::time::sleep(tick) => {
                    remaining -= tick;
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        return SleepOutcome::Stopped;
                    }
                }
            }
        }
    }
}
