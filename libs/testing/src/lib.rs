//! Test doubles for the watcher.
//!
//! Every fake records what it was asked to do so tests can assert on call
//! counts and ordering. [`Harness`] wires them into a ready
//! [`GroupRegistry`](leasewatch_watcher::GroupRegistry).

mod catalog;
mod clock;
mod harness;
mod metrics;
mod store;
mod transport;

pub use catalog::ScriptedCatalog;
pub use clock::TokioClock;
pub use harness::{item, items, test_policy, Harness};
pub use metrics::RecordingMetrics;
pub use store::MemoryStore;
pub use transport::{RecordingTransport, ScriptedInbound, SentMessage};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, ignoring poisoning from a panicked test thread.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
