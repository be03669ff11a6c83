//! Scripted catalog.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use leasewatch_id::TierKey;
use leasewatch_snapshot::Item;
use leasewatch_watcher::catalog::{CatalogClient, CatalogError};
use tracing::debug;

use crate::lock;

#[derive(Default)]
struct State {
    tiers: HashMap<String, TierKey>,
    tier_failures: HashMap<String, CatalogError>,
    tier_delays: HashMap<String, Duration>,
    fetch_failures: HashMap<String, CatalogError>,
    items: HashMap<TierKey, Vec<Item>>,
    logins: HashMap<(String, String), String>,
    fetch_log: Vec<String>,
    tier_log: Vec<String>,
}

/// Catalog that answers from tables set up by the test.
///
/// Credentials without a tier are rejected as unauthorized.
#[derive(Default)]
pub struct ScriptedCatalog {
    state: Mutex<State>,
}

impl ScriptedCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `credential` to `tier`.
    pub fn set_tier(&self, credential: &str, tier: &str) {
        let tier = TierKey::new(tier).unwrap_or_else(|e| panic!("invalid tier {tier}: {e}"));
        lock(&self.state).tiers.insert(credential.to_string(), tier);
    }

    /// Make tier lookups for `credential` fail.
    pub fn fail_tier(&self, credential: &str, error: CatalogError) {
        lock(&self.state)
            .tier_failures
            .insert(credential.to_string(), error);
    }

    /// Make tier lookups for `credential` take `delay` of tokio time. The
    /// answer is read when the delay ends.
    pub fn delay_tier(&self, credential: &str, delay: Duration) {
        lock(&self.state)
            .tier_delays
            .insert(credential.to_string(), delay);
    }

    /// Make item fetches with `credential` fail.
    pub fn fail_fetch(&self, credential: &str, error: CatalogError) {
        lock(&self.state)
            .fetch_failures
            .insert(credential.to_string(), error);
    }

    /// Clear every injected failure for `credential`.
    pub fn heal(&self, credential: &str) {
        let mut state = lock(&self.state);
        state.tier_failures.remove(credential);
        state.fetch_failures.remove(credential);
    }

    /// Items visible to `tier`.
    pub fn set_items(&self, tier: &str, items: Vec<Item>) {
        let tier = TierKey::new(tier).unwrap_or_else(|e| panic!("invalid tier {tier}: {e}"));
        lock(&self.state).items.insert(tier, items);
    }

    /// Accept `username`/`password` in exchange for `credential`.
    pub fn add_login(&self, username: &str, password: &str, credential: &str) {
        lock(&self.state).logins.insert(
            (username.to_string(), password.to_string()),
            credential.to_string(),
        );
    }

    /// Credentials used for item fetches, in call order.
    pub fn fetch_calls(&self) -> Vec<String> {
        lock(&self.state).fetch_log.clone()
    }

    /// Credentials used for tier lookups, in call order.
    pub fn tier_calls(&self) -> Vec<String> {
        lock(&self.state).tier_log.clone()
    }

    /// Number of item fetches.
    pub fn fetch_count(&self) -> usize {
        lock(&self.state).fetch_log.len()
    }

    /// Number of catalog calls of any kind.
    pub fn total_calls(&self) -> usize {
        let state = lock(&self.state);
        state.fetch_log.len() + state.tier_log.len()
    }

    fn tier_of(state: &State, credential: &str) -> Result<TierKey, CatalogError> {
        state
            .tiers
            .get(credential)
            .cloned()
            .ok_or_else(|| CatalogError::Unauthorized(format!("unknown credential {credential}")))
    }
}

#[async_trait]
impl CatalogClient for ScriptedCatalog {
    async fn fetch_all(
        &self,
        credential: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<Item>, CatalogError> {
        let mut state = lock(&self.state);
        state.fetch_log.push(credential.to_string());
        debug!(credential, offset, page_size, "[SCRIPTED] Fetching items");

        if let Some(error) = state.fetch_failures.get(credential) {
            return Err(error.clone());
        }
        let tier = Self::tier_of(&state, credential)?;
        Ok(state
            .items
            .get(&tier)
            .map(|items| items.iter().skip(offset).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_tier_info(&self, credential: &str) -> Result<TierKey, CatalogError> {
        let delay = {
            let mut state = lock(&self.state);
            state.tier_log.push(credential.to_string());
            state.tier_delays.get(credential).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = lock(&self.state);
        if let Some(error) = state.tier_failures.get(credential) {
            return Err(error.clone());
        }
        Self::tier_of(&state, credential)
    }

    async fn exchange_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, CatalogError> {
        lock(&self.state)
            .logins
            .get(&(username.to_string(), password.to_string()))
            .cloned()
            .ok_or_else(|| CatalogError::Unauthorized("invalid username or password".to_string()))
    }
}
