//! Typed ID definitions.

use crate::{define_numeric_id, define_opaque_key, define_ulid_id};

// =============================================================================
// Transport-assigned
// =============================================================================

define_numeric_id!(
    /// Chat id of a subscriber. Also the address outbound messages go to.
    SubscriberId
);

define_numeric_id!(
    /// Id of a delivered chat message.
    MessageId
);

// =============================================================================
// Upstream-assigned
// =============================================================================

define_opaque_key!(
    /// Access-tier identifier reported by the catalog for a credential.
    ///
    /// Subscribers sharing a tier key see the same catalog and share one group.
    TierKey
);

define_opaque_key!(
    /// Stable identity of a catalog item.
    ItemId
);

// =============================================================================
// System-generated
// =============================================================================

define_ulid_id!(BatchId, "nb");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_batch_id_roundtrip() {
        let id = BatchId::new();
        let s = id.to_string();
        assert!(s.starts_with("nb_"));
        let parsed: BatchId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_batch_id_rejects_other_prefix() {
        let result: Result<BatchId, _> = "run_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.unwrap_err().is_prefix_error());
    }

    #[test]
    fn test_ulid_id_missing_separator() {
        let result: Result<BatchId, _> = "nb01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::MissingSeparator));
    }

    #[test]
    fn test_tier_key_rejects_blank() {
        assert!(TierKey::new("").unwrap_err().is_empty());
        assert!(TierKey::new("   ").unwrap_err().is_empty());
        assert_eq!(TierKey::new("gold").unwrap().as_str(), "gold");
    }

    #[test]
    fn test_tier_key_serde_is_plain_string() {
        let key = TierKey::new("Mitarbeiter").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"Mitarbeiter\"");

        let blank: Result<TierKey, _> = serde_json::from_str("\"\"");
        assert!(blank.is_err());
    }

    #[test]
    fn test_subscriber_id_parse() {
        let id: SubscriberId = "123456789".parse().unwrap();
        assert_eq!(id.value(), 123_456_789);
        assert!("abc".parse::<SubscriberId>().is_err());
        assert!("".parse::<SubscriberId>().unwrap_err().is_empty());
    }

    #[test]
    fn test_subscriber_id_serde_is_number() {
        let id = SubscriberId::new(-1001);
        assert_eq!(serde_json::to_string(&id).unwrap(), "-1001");
        let back: SubscriberId = serde_json::from_str("-1001").unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn prop_subscriber_id_display_parses_back(raw in any::<i64>()) {
            let id = SubscriberId::new(raw);
            let parsed: SubscriberId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn prop_item_id_accepts_non_blank(s in "[a-zA-Z0-9-]{1,24}") {
            let id = ItemId::new(s.clone()).unwrap();
            prop_assert_eq!(id.as_str(), s.as_str());
        }
    }
}
