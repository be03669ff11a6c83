//! Service-level errors.

use leasewatch_id::SubscriberId;
use leasewatch_render::{ComposeError, RenderError};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Errors surfaced by subscriber commands and service wiring.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("unknown subscriber {0}, send /start first")]
    UnknownSubscriber(SubscriberId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("template error: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

/// Result alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;
