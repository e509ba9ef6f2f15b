mod foreman;
mod registry;

pub use foreman::HttpForemanClient;
pub use registry::HttpRegistryClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// What the gateway keeps from an upstream HTTP exchange: enough to relay
/// the outcome and to follow redirect/pagination headers.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub location: Option<String>,
    pub link: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::upstream_status(self.status, format!("malformed body: {e}")))
    }
}

/// Token document returned by the identity provider. `issued_at` and
/// `expires_in` are optional per OAuth2.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPayload {
    pub token: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_in: Option<i64>,
}

/// Upstream identity provider (Foreman). Exchanges credentials for bearer
/// tokens and reports per-identity repository lists.
#[async_trait]
pub trait ForemanClient: Send + Sync {
    async fn fetch_token(
        &self,
        auth_header: Option<&str>,
        account: Option<&str>,
        scope: Option<&str>,
    ) -> Result<UpstreamResponse>;

    async fn fetch_account_repositories(
        &self,
        auth_header: Option<&str>,
        account: Option<&str>,
    ) -> Result<UpstreamResponse>;

    async fn fetch_node_repositories(&self, node_uuid: &str) -> Result<UpstreamResponse>;
}

/// Upstream content store (Pulp's registry API). The gateway relays status,
/// body and redirect location; it never interprets manifest or blob bytes.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn ping(&self, headers: &HeaderMap) -> Result<UpstreamResponse>;

    /// The flatpak static index document, with the caller's query string
    /// passed through untouched.
    async fn static_index(&self, headers: &HeaderMap, query: Option<&str>)
    -> Result<UpstreamResponse>;

    async fn manifests(
        &self,
        repository: &str,
        tag: &str,
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse>;

    async fn blobs(
        &self,
        repository: &str,
        digest: &str,
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse>;

    async fn tags(
        &self,
        repository: &str,
        headers: &HeaderMap,
        n: Option<&str>,
        last: Option<&str>,
    ) -> Result<UpstreamResponse>;
}
