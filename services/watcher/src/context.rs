//! Shared collaborators for groups, the registry and commands.

use std::sync::Arc;

use leasewatch_render::Renderer;

use crate::catalog::CatalogClient;
use crate::clock::Clock;
use crate::delivery::DeliveryScheduler;
use crate::directory::SubscriberDirectory;
use crate::metrics::Metrics;
use crate::policy::RatePolicy;

/// Everything a group loop needs besides its own state.
pub struct WatcherContext {
    pub catalog: Arc<dyn CatalogClient>,
    pub renderer: Arc<dyn Renderer>,
    pub metrics: Arc<dyn Metrics>,
    pub clock: Arc<dyn Clock>,
    pub directory: Arc<SubscriberDirectory>,
    pub deliveries: DeliveryScheduler,
    pub policy: RatePolicy,

    /// Catalog page size for group polls.
    pub page_size: usize,
}
