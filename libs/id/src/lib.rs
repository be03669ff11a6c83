//! # leasewatch-id
//!
//! Typed identifiers used across the leasewatch workspace.
//!
//! ## ID Kinds
//!
//! - `SubscriberId`: the chat id of a subscriber (numeric, assigned by the transport)
//! - `MessageId`: a message id returned by the transport, used for deletes
//! - `TierKey`: the access-tier identifier reported by the catalog for a credential
//! - `ItemId`: the stable identity of a catalog item, the join key for diffs
//! - `BatchId`: system-generated `nb_{ulid}` id of an outbound notification
//!   batch
//!
//! Tier keys and item ids come from upstream and are treated as opaque,
//! validated only for non-emptiness.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
