//! Catalog API client.
//!
//! The catalog serves the items visible to a credential, the tier that
//! credential belongs to, and exchanges username/password for a credential.

use std::time::Duration;

use async_trait::async_trait;
use leasewatch_id::{ItemId, TierKey};
use leasewatch_snapshot::Item;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default JSON pointer to an item's stable identity.
pub const DEFAULT_IDENTITY_POINTER: &str = "/rentalObject/ident";

/// Errors from catalog calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Network or upstream failure. Retried on the next cycle.
    #[error("catalog unavailable: {0}")]
    Transient(String),

    /// The credential was rejected. Isolated to the subscriber it belongs to.
    #[error("credential rejected: {0}")]
    Unauthorized(String),
}

impl CatalogError {
    /// Returns true if the credential itself was rejected.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

/// Catalog client interface.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch every item visible to `credential`, starting at `offset`, in
    /// pages of `page_size`.
    async fn fetch_all(
        &self,
        credential: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<Item>, CatalogError>;

    /// Look up the tier `credential` belongs to.
    async fn fetch_tier_info(&self, credential: &str) -> Result<TierKey, CatalogError>;

    /// Exchange a username and password for a credential.
    async fn exchange_credentials(&self, username: &str, password: &str)
        -> Result<String, CatalogError>;
}

// =============================================================================
// HTTP client
// =============================================================================

/// One page of the item listing.
#[derive(Debug, Deserialize)]
struct ItemPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    address_role: AddressRole,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressRole {
    role_name: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Catalog client over HTTP.
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
    identity_pointer: String,
}

impl HttpCatalogClient {
    /// Create a new catalog client.
    pub fn new(base_url: impl Into<String>) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity_pointer: DEFAULT_IDENTITY_POINTER.to_string(),
        })
    }

    /// Use a different JSON pointer to locate item identities.
    pub fn with_identity_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.identity_pointer = pointer.into();
        self
    }

    fn to_item(&self, raw: serde_json::Value) -> Option<Item> {
        let ident = match raw.pointer(&self.identity_pointer)? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let id = ItemId::new(ident).ok()?;
        Some(Item::new(id, raw))
    }
}

async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{what}: {status} - {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CatalogError::Unauthorized(message)),
        _ => Err(CatalogError::Transient(message)),
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn fetch_all(
        &self,
        credential: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<Item>, CatalogError> {
        let page_size = page_size.max(1);
        let url = format!("{}/api/items", self.base_url);
        let mut offset = offset;
        let mut items = Vec::new();

        loop {
            debug!(url = %url, offset, page_size, "Fetching item page");

            let response = self
                .client
                .get(&url)
                .bearer_auth(credential)
                .query(&[("offset", offset), ("limit", page_size)])
                .send()
                .await?;
            let page: ItemPage = check_status(response, "fetch items").await?.json().await?;

            let received = page.items.len();
            for raw in page.items {
                match self.to_item(raw) {
                    Some(item) => items.push(item),
                    None => warn!(pointer = %self.identity_pointer, "Skipping item without identity"),
                }
            }

            offset += received;
            let exhausted = match page.total {
                Some(total) => offset >= total,
                None => received < page_size,
            };
            if received == 0 || exhausted {
                break;
            }
        }

        debug!(item_count = items.len(), "Fetched all items");
        Ok(items)
    }

    async fn fetch_tier_info(&self, credential: &str) -> Result<TierKey, CatalogError> {
        let url = format!("{}/api/user", self.base_url);

        let response = self.client.get(&url).bearer_auth(credential).send().await?;
        let info: UserInfo = check_status(response, "fetch user info").await?.json().await?;

        TierKey::new(info.address_role.role_name)
            .map_err(|e| CatalogError::Transient(format!("user info without tier: {e}")))
    }

    async fn exchange_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, CatalogError> {
        let url = format!("{}/api/login", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let login: LoginResponse = check_status(response, "login").await?.json().await?;

        Ok(login.token)
    }
}
