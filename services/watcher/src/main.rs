//! leasewatch
//!
//! Watches a leasing catalog for every subscriber tier and sends the
//! changes to subscribers over chat.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use leasewatch_render::TemplateEngine;
use leasewatch_watcher::{
    api::{self, ApiState},
    catalog::HttpCatalogClient,
    clock::SystemClock,
    commands::{SubscriberService, SystemNotice},
    config::Config,
    delivery::DeliveryScheduler,
    directory::SubscriberDirectory,
    dispatch::run_dispatch_loop,
    metrics::PrometheusMetrics,
    policy::RatePolicy,
    store::SqliteSubscriberStore,
    transport::TelegramTransport,
    GroupRegistry, RegistryOptions, WatcherContext,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn load_notices(path: &Path) -> Result<Vec<SystemNotice>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read notices from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid notices file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to LEASEWATCH_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting leasewatch");
    info!(
        listen_addr = %config.listen_addr,
        db_path = %config.db_path.display(),
        poll_interval_mins = config.poll_interval_mins,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteSubscriberStore::open(&config.db_path).context("failed to open subscriber store")?,
    );
    let directory = Arc::new(SubscriberDirectory::load(store).await?);

    let notices = match &config.notices_path {
        Some(path) => load_notices(path)?,
        None => Vec::new(),
    };

    let metrics = Arc::new(PrometheusMetrics::new().context("failed to register metrics")?);
    let telegram = Arc::new(TelegramTransport::new(
        &config.telegram_url,
        &config.telegram_token,
    )?);
    let catalog = Arc::new(
        HttpCatalogClient::new(config.catalog_url.clone())?
            .with_identity_pointer(config.catalog_identity_pointer.clone()),
    );
    let policy = RatePolicy::from_config(&config);

    let deliveries = DeliveryScheduler::new(telegram.clone(), metrics.clone());
    let ctx = Arc::new(WatcherContext {
        catalog,
        renderer: Arc::new(TemplateEngine::new()),
        metrics: metrics.clone(),
        clock: Arc::new(SystemClock),
        directory: Arc::clone(&directory),
        deliveries: deliveries.clone(),
        policy: policy.clone(),
        page_size: config.page_size,
    });
    let registry = GroupRegistry::new(ctx, RegistryOptions::default());

    // Re-register everyone who had notifications on
    for handle in directory.enabled().await {
        let id = handle.lock().await.id;
        if let Err(e) = registry.register(handle).await {
            warn!(subscriber_id = %id, error = %e, "Failed to register subscriber at startup");
        }
    }
    let groups = registry.group_keys().await.len();
    info!(groups, "Groups started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let service = Arc::new(
        SubscriberService::new(
            registry.clone(),
            Duration::from_secs(config.min_throttle_mins * 60),
        )
        .with_notices(notices),
    );
    let dispatch_handle = tokio::spawn(run_dispatch_loop(
        telegram.clone(),
        telegram.clone(),
        service,
        policy,
        shutdown_rx.clone(),
    ));

    let app = api::create_router(ApiState {
        registry: registry.clone(),
        metrics,
        startup: Utc::now(),
    });
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    deliveries.shutdown();

    info!("Waiting for groups to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if tokio::time::timeout(shutdown_timeout, registry.stop_all())
        .await
        .is_err()
    {
        warn!("Groups did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, dispatch_handle).await {
        warn!(error = %e, "Command dispatch did not shut down in time");
    }

    if let Err(e) = directory.persist().await {
        error!(error = %e, "Failed to persist subscribers on shutdown");
    }

    info!("leasewatch shutdown complete");
    Ok(())
}
