use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};

use super::{ForemanClient, UpstreamResponse};
use crate::config::Settings;
use crate::error::Result;

/// reqwest-backed identity provider client.
pub struct HttpForemanClient {
    client: reqwest::Client,
    base_url: String,
    token_path: String,
}

impl HttpForemanClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: settings.foreman_url.trim_end_matches('/').to_string(),
            token_path: settings.registry_token_path.clone(),
        })
    }

    async fn get(
        &self,
        path: &str,
        auth_header: Option<&str>,
        query: &[(&str, &str)],
    ) -> Result<UpstreamResponse> {
        let mut request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header(ACCEPT, "application/json")
            .query(query);
        if let Some(header) = auth_header {
            request = request.header(AUTHORIZATION, header);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let date = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));
        let body = response.bytes().await?.to_vec();

        Ok(UpstreamResponse {
            status,
            body,
            location: None,
            link: None,
            date,
        })
    }
}

#[async_trait]
impl ForemanClient for HttpForemanClient {
    async fn fetch_token(
        &self,
        auth_header: Option<&str>,
        account: Option<&str>,
        scope: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let mut query = Vec::new();
        if let Some(account) = account {
            query.push(("account", account));
        }
        if let Some(scope) = scope {
            query.push(("scope", scope));
        }
        self.get(&self.token_path, auth_header, &query).await
    }

    async fn fetch_account_repositories(
        &self,
        auth_header: Option<&str>,
        account: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let mut query = Vec::new();
        if let Some(account) = account {
            query.push(("account", account));
        }
        self.get("/v2/account_repositories", auth_header, &query)
            .await
    }

    async fn fetch_node_repositories(&self, node_uuid: &str) -> Result<UpstreamResponse> {
        self.get("/v2/host_repositories", None, &[("uuid", node_uuid)])
            .await
    }
}
