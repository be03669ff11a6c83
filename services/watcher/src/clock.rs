//! Wall-clock source.

use chrono::{DateTime, Utc};

/// Source of the wall-clock time used for snapshot timestamps and
/// throttle checks.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
