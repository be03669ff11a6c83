//! Catalog snapshots and identity-keyed diffs.
//!
//! A poll produces a [`Snapshot`]: the items visible to one tier at one
//! point in time. Each subscriber keeps an [`UpdateFrame`] holding the last
//! snapshot it applied together with the [`Diff`] against the one before.
//!
//! # Invariants
//!
//! - Diffs join on [`ItemId`] only; attribute changes are invisible
//! - `diff(a, a)` never has changes
//! - `diff(a, b).added == diff(b, a).removed`
//! - Diffing is pure and O(n)

mod diff;
mod frame;
mod item;

pub use diff::{diff, Diff};
pub use frame::UpdateFrame;
pub use item::{Item, Snapshot};

pub use leasewatch_id::ItemId;
