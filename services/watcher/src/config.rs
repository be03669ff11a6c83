//! Configuration for the watcher service.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::catalog::DEFAULT_IDENTITY_POINTER;

/// Largest page size the catalog accepts.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Watcher service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat transport bot token.
    pub telegram_token: String,

    /// Chat transport base URL.
    pub telegram_url: String,

    /// Catalog API base URL.
    pub catalog_url: String,

    /// JSON pointer to the identity of a catalog item.
    pub catalog_identity_pointer: String,

    /// SQLite database path for subscriber records.
    pub db_path: PathBuf,

    /// Optional JSON file with system notices shown to subscribers.
    pub notices_path: Option<PathBuf>,

    /// Listen address for the status API.
    pub listen_addr: SocketAddr,

    /// Group poll interval in minutes.
    pub poll_interval_mins: u64,

    /// Catalog page size.
    pub page_size: usize,

    /// Delay before ordinary subscribers receive a notification batch.
    pub outbound_delay_secs: u64,

    /// Lowest throttle a non-privileged subscriber may choose.
    pub min_throttle_mins: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let telegram_token = std::env::var("LEASEWATCH_TELEGRAM_TOKEN")
            .context("LEASEWATCH_TELEGRAM_TOKEN must be set")?;

        let telegram_url = std::env::var("LEASEWATCH_TELEGRAM_URL")
            .unwrap_or_else(|_| "https://api.telegram.org".to_string());

        let catalog_url = std::env::var("LEASEWATCH_CATALOG_URL")
            .unwrap_or_else(|_| "https://api.leaseplan-abocar.de".to_string());

        let catalog_identity_pointer = std::env::var("LEASEWATCH_CATALOG_IDENTITY_POINTER")
            .unwrap_or_else(|_| DEFAULT_IDENTITY_POINTER.to_string());
        if !catalog_identity_pointer.starts_with('/') {
            anyhow::bail!("LEASEWATCH_CATALOG_IDENTITY_POINTER must start with '/'");
        }

        let db_path = std::env::var("LEASEWATCH_DB_PATH")
            .unwrap_or_else(|_| "./leasewatch.sqlite".to_string())
            .into();

        let notices_path = std::env::var("LEASEWATCH_NOTICES_PATH").ok().map(PathBuf::from);

        let listen_addr = std::env::var("LEASEWATCH_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:2112".to_string())
            .parse()
            .context("LEASEWATCH_LISTEN_ADDR is not a socket address")?;

        let poll_interval_mins = env_number("LEASEWATCH_POLL_INTERVAL_MINS", 5)?.max(1);

        let page_size = env_number("LEASEWATCH_PAGE_SIZE", 500)?.clamp(1, MAX_PAGE_SIZE as u64) as usize;

        let outbound_delay_secs = env_number("LEASEWATCH_OUTBOUND_DELAY_SECS", 300)?;

        let min_throttle_mins = env_number("LEASEWATCH_MIN_THROTTLE_MINS", 15)?;

        let log_level =
            std::env::var("LEASEWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            telegram_token,
            telegram_url,
            catalog_url,
            catalog_identity_pointer,
            db_path,
            notices_path,
            listen_addr,
            poll_interval_mins,
            page_size,
            outbound_delay_secs,
            min_throttle_mins,
            log_level,
        })
    }
}

fn env_number(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
