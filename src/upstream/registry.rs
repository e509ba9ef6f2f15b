use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName};
use reqwest::redirect::Policy;

use super::{RegistryClient, UpstreamResponse};
use crate::config::Settings;
use crate::error::{Error, Result};

/// Headers never forwarded to the upstream store.
const SKIPPED_HEADERS: &[HeaderName] = &[
    reqwest::header::HOST,
    reqwest::header::CONTENT_LENGTH,
    reqwest::header::CONNECTION,
    reqwest::header::TRANSFER_ENCODING,
];

/// reqwest-backed content store client, authenticated towards the upstream
/// registry by a TLS client identity.
pub struct HttpRegistryClient {
    client: reqwest::Client,
    registry_url: String,
    index_url: String,
}

impl HttpRegistryClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        // Redirects are surfaced, not followed: the gateway rewrites the
        // upstream `location` to the client endpoint.
        let mut builder = reqwest::Client::builder().redirect(Policy::none());

        if let (Some(cert), Some(key)) = (
            &settings.pulp_client_ssl_cert,
            &settings.pulp_client_ssl_key,
        ) {
            let mut pem = std::fs::read(cert)?;
            pem.extend_from_slice(&std::fs::read(key)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| Error::Config(format!("client TLS identity: {e}")))?;
            builder = builder.identity(identity);
        }
        if let Some(ca) = &settings.pulp_client_ssl_ca {
            let ca = reqwest::Certificate::from_pem(&std::fs::read(ca)?)
                .map_err(|e| Error::Config(format!("client TLS CA: {e}")))?;
            builder = builder.add_root_certificate(ca);
        }

        let endpoint = settings.pulp_endpoint.trim_end_matches('/');
        Ok(Self {
            client: builder.build()?,
            registry_url: format!("{endpoint}/pulpcore_registry/v2"),
            index_url: format!("{endpoint}/index/static"),
        })
    }

    async fn get(
        &self,
        url: String,
        headers: &HeaderMap,
        query: &[(&str, &str)],
    ) -> Result<UpstreamResponse> {
        let mut forwarded = HeaderMap::new();
        for (name, value) in headers {
            if !SKIPPED_HEADERS.contains(name) {
                forwarded.append(name.clone(), value.clone());
            }
        }

        let response = self
            .client
            .get(url)
            .headers(forwarded)
            .query(query)
            .send()
            .await?;

        let status = response.status().as_u16();
        let header_str = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let location = header_str(reqwest::header::LOCATION);
        let link = header_str(reqwest::header::LINK);
        let body = response.bytes().await?.to_vec();

        Ok(UpstreamResponse {
            status,
            body,
            location,
            link,
            date: None,
        })
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn ping(&self, headers: &HeaderMap) -> Result<UpstreamResponse> {
        self.get(format!("{}/", self.registry_url), headers, &[])
            .await
    }

    async fn static_index(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let url = match query {
            Some(query) => format!("{}?{query}", self.index_url),
            None => self.index_url.clone(),
        };
        self.get(url, headers, &[]).await
    }

    async fn manifests(
        &self,
        repository: &str,
        tag: &str,
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse> {
        self.get(
            format!("{}/{repository}/manifests/{tag}", self.registry_url),
            headers,
            &[],
        )
        .await
    }

    async fn blobs(
        &self,
        repository: &str,
        digest: &str,
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse> {
        self.get(
            format!("{}/{repository}/blobs/{digest}", self.registry_url),
            headers,
            &[],
        )
        .await
    }

    async fn tags(
        &self,
        repository: &str,
        headers: &HeaderMap,
        n: Option<&str>,
        last: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let mut query = Vec::new();
        if let Some(n) = n {
            query.push(("n", n));
        }
        if let Some(last) = last {
            query.push(("last", last));
        }
        self.get(
            format!("{}/{repository}/tags/list", self.registry_url),
            headers,
            &query,
        )
        .await
    }
}
