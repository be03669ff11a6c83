//! Test clock.

use chrono::{DateTime, TimeZone, Utc};
use leasewatch_watcher::clock::Clock;
use tokio::time::Instant;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Wall clock driven by tokio's timer, so it follows paused and
/// auto-advanced test time.
pub struct TokioClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl TokioClock {
    /// Create a clock that reads `base` now.
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            started: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new(epoch())
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or(chrono::Duration::MAX);
        self.base + elapsed
    }
}
