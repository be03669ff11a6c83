//! Per-subscriber update frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{diff, Diff, Item};

/// The last update a subscriber applied: previous and current item lists
/// plus the diff between them.
///
/// Serialized field names double as template paths
/// (`{{ len .added }}`, `{{ len .current }}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateFrame {
    #[serde(default)]
    pub previous: Vec<Item>,
    #[serde(default)]
    pub current: Vec<Item>,
    #[serde(default)]
    pub added: Vec<Item>,
    #[serde(default)]
    pub removed: Vec<Item>,
    #[serde(default)]
    pub has_changes: bool,

    /// When the snapshot behind `current` was captured. `None` until the
    /// first update is applied.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

impl UpdateFrame {
    /// A frame that has never seen a snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the frame that follows `self` when `current` is applied.
    pub fn advance(&self, current: Vec<Item>, captured_at: DateTime<Utc>) -> Self {
        let Diff {
            added,
            removed,
            has_changes,
        } = diff(&self.current, &current);

        Self {
            previous: self.current.clone(),
            current,
            added,
            removed,
            has_changes,
            captured_at: Some(captured_at),
        }
    }

    /// Template data for rendering summaries.
    pub fn to_template_data(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leasewatch_id::ItemId;

    fn item(id: &str) -> Item {
        Item::bare(ItemId::new(id).unwrap())
    }

    #[test]
    fn test_advance_from_empty() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let frame = UpdateFrame::empty().advance(vec![item("1"), item("2")], at);

        assert!(frame.previous.is_empty());
        assert_eq!(frame.current.len(), 2);
        assert_eq!(frame.added.len(), 2);
        assert!(frame.has_changes);
        assert_eq!(frame.captured_at, Some(at));
    }

    #[test]
    fn test_advance_chains_current_into_previous() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let first = UpdateFrame::empty().advance(vec![item("1"), item("2")], at);
        let second = first.advance(vec![item("2"), item("3")], at);

        assert_eq!(second.previous, first.current);
        assert_eq!(second.added, vec![item("3")]);
        assert_eq!(second.removed, vec![item("1")]);
    }

    #[test]
    fn test_template_data_field_names() {
        let data = UpdateFrame::empty().to_template_data();
        for key in ["previous", "current", "added", "removed", "has_changes"] {
            assert!(data.get(key).is_some(), "missing {key}");
        }
    }
}
