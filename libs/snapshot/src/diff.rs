//! Identity-keyed snapshot differ.

use std::collections::HashSet;

use leasewatch_id::ItemId;
use serde::{Deserialize, Serialize};

use crate::Item;

/// Items added and removed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Items whose identity is in current but not previous.
    pub added: Vec<Item>,

    /// Items whose identity is in previous but not current.
    pub removed: Vec<Item>,

    /// `!added.is_empty() || !removed.is_empty()`.
    pub has_changes: bool,
}

impl Diff {
    /// Total number of changed items.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Compute the diff between two item lists by identity.
///
/// Items present on both sides are never reported, even if their attributes
/// differ. Duplicate identities on one side count once, first occurrence
/// wins. Result order follows the input order of the side an item came
/// from, but callers must not rely on it.
pub fn diff(previous: &[Item], current: &[Item]) -> Diff {
    let previous_ids: HashSet<&ItemId> = previous.iter().map(|item| &item.id).collect();
    let current_ids: HashSet<&ItemId> = current.iter().map(|item| &item.id).collect();

    let added = only_in(current, &previous_ids);
    let removed = only_in(previous, &current_ids);
    let has_changes = !added.is_empty() || !removed.is_empty();

    Diff {
        added,
        removed,
        has_changes,
    }
}

fn only_in(side: &[Item], other: &HashSet<&ItemId>) -> Vec<Item> {
    let mut seen = HashSet::with_capacity(side.len());
    side.iter()
        .filter(|item| !other.contains(&item.id) && seen.insert(&item.id))
        .cloned()
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn item(id: &str) -> Item {
        Item::bare(ItemId::new(id).unwrap())
    }

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter().map(|id| item(id)).collect()
    }

    fn ids(items: &[Item]) -> Vec<String> {
        let mut ids: Vec<String> = items.iter().map(|i| i.id.to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_diff_scenario() {
        let d = diff(&items(&["1", "2"]), &items(&["2", "3"]));
        assert_eq!(ids(&d.added), vec!["3"]);
        assert_eq!(ids(&d.removed), vec!["1"]);
        assert!(d.has_changes);
        assert_eq!(d.change_count(), 2);
    }

    #[test]
    fn test_attribute_changes_are_ignored() {
        let before = vec![Item::new(
            ItemId::new("car-1").unwrap(),
            serde_json::json!({"price": 100}),
        )];
        let after = vec![Item::new(
            ItemId::new("car-1").unwrap(),
            serde_json::json!({"price": 200}),
        )];
        let d = diff(&before, &after);
        assert!(!d.has_changes);
    }

    #[test]
    fn test_duplicate_identities_reported_once() {
        let d = diff(&[], &items(&["a", "a", "b"]));
        assert_eq!(ids(&d.added), vec!["a", "b"]);
    }

    #[rstest]
    #[case(&[], &[], false)]
    #[case(&["1"], &[], true)]
    #[case(&[], &["1"], true)]
    #[case(&["1", "2"], &["2", "1"], false)]
    fn test_has_changes(#[case] prev: &[&str], #[case] cur: &[&str], #[case] expected: bool) {
        assert_eq!(diff(&items(prev), &items(cur)).has_changes, expected);
    }

    fn arb_items() -> impl Strategy<Value = Vec<Item>> {
        prop::collection::vec("[a-f]{1,2}", 0..24)
            .prop_map(|ids| ids.iter().map(|id| item(id)).collect())
    }

    proptest! {
        #[test]
        fn prop_self_diff_has_no_changes(a in arb_items()) {
            let d = diff(&a, &a);
            prop_assert!(!d.has_changes);
            prop_assert!(d.added.is_empty() && d.removed.is_empty());
        }

        #[test]
        fn prop_antisymmetric(a in arb_items(), b in arb_items()) {
            let forward = diff(&a, &b);
            let backward = diff(&b, &a);
            prop_assert_eq!(ids(&forward.added), ids(&backward.removed));
            prop_assert_eq!(ids(&forward.removed), ids(&backward.added));
        }

        #[test]
        fn prop_added_removed_disjoint_from_common(a in arb_items(), b in arb_items()) {
            let d = diff(&a, &b);
            let in_a: HashSet<_> = a.iter().map(|i| i.id.clone()).collect();
            let in_b: HashSet<_> = b.iter().map(|i| i.id.clone()).collect();

            for added in &d.added {
                prop_assert!(in_b.contains(&added.id) && !in_a.contains(&added.id));
            }
            for removed in &d.removed {
                prop_assert!(in_a.contains(&removed.id) && !in_b.contains(&removed.id));
            }
            prop_assert_eq!(d.has_changes, !d.added.is_empty() || !d.removed.is_empty());
        }
    }
}
