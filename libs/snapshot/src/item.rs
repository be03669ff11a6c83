//! Catalog items and timestamped snapshots.

use chrono::{DateTime, Utc};
use leasewatch_id::ItemId;
use serde::{Deserialize, Serialize};

/// A single leasable catalog item.
///
/// Only `id` is interpreted by the watcher. `attributes` carries the raw
/// upstream record and is handed to templates and filters untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identity, the diff join key.
    pub id: ItemId,

    /// Upstream attributes.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Item {
    /// Create an item.
    pub fn new(id: ItemId, attributes: serde_json::Value) -> Self {
        Self { id, attributes }
    }

    /// Create an item that only carries an identity.
    pub fn bare(id: ItemId) -> Self {
        Self {
            id,
            attributes: serde_json::Value::Null,
        }
    }
}

/// The items visible to one tier at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Items in upstream order.
    pub items: Vec<Item>,

    /// Wall-clock time the poll that produced this snapshot completed.
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot.
    pub fn new(items: Vec<Item>, captured_at: DateTime<Utc>) -> Self {
        Self { items, captured_at }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the snapshot has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
