//! Group watcher scheduler.
//!
//! Subscribers who share a catalog tier are grouped under one [`group::Group`].
//! Each group runs a single poll loop that rotates through its members'
//! credentials, then hands the snapshot to every member for diffing,
//! throttling and delivery.
//!
//! The crate is organized as:
//! - [`registry`]: tier groups and subscriber membership
//! - [`group`]: the per-tier poll loop
//! - [`subscriber`]: subscriber records and update application
//! - [`delivery`]: delayed, cancellable outbound batches
//! - [`commands`] and [`dispatch`]: the subscriber command surface
//! - [`api`]: status and metrics endpoints

pub mod api;
pub mod catalog;
pub mod clock;
pub mod commands;
pub mod config;
pub mod context;
pub mod delivery;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod store;
pub mod subscriber;
pub mod transport;

pub use context::WatcherContext;
pub use error::{Result, WatcherError};
pub use registry::{GroupRegistry, RegistryOptions};
