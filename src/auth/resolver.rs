use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::cert;
use super::token::{TokenService, UNAUTHENTICATED_TOKEN, UNAUTHORIZED_TOKEN};
use crate::error::{Error, Result};
use crate::types::Identity;
use crate::upstream::{ForemanClient, TokenPayload};

/// Username half of a `Basic` authorization header, if it decodes.
pub fn basic_username(header: &str) -> Option<String> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let pair = String::from_utf8(decoded).ok()?;
    let (username, _) = pair.split_once(':')?;
    if username.is_empty() {
        None
    } else {
        Some(username.to_string())
    }
}

/// Turns raw request credentials into exactly one [`Identity`].
///
/// A usable client certificate wins over the authorization header. Bearer
/// tokens resolve locally; basic credentials are delegated to the identity
/// provider and adopted only when the exchange succeeds.
pub struct IdentityResolver {
    tokens: TokenService,
    foreman: Arc<dyn ForemanClient>,
}

impl IdentityResolver {
    pub fn new(tokens: TokenService, foreman: Arc<dyn ForemanClient>) -> Self {
        Self { tokens, foreman }
    }

    pub async fn resolve(
        &self,
        cert_blob: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<Identity> {
        if let Some(cn) = cert_blob.and_then(cert::subject_common_name) {
            return Ok(Identity::Node(cn));
        }

        let Some(header) = authorization.filter(|h| !h.trim().is_empty()) else {
            return Ok(Identity::Anonymous);
        };

        if let Some(raw_token) = header.strip_prefix("Bearer ") {
            return self.resolve_bearer(raw_token.trim());
        }
        if header.starts_with("Basic ") {
            return self.resolve_basic(header).await;
        }
        Err(Error::Unauthorized)
    }

    fn resolve_bearer(&self, raw_token: &str) -> Result<Identity> {
        match raw_token {
            UNAUTHORIZED_TOKEN => return Ok(Identity::UnauthorizedToken),
            UNAUTHENTICATED_TOKEN => return Ok(Identity::UnauthenticatedToken),
            _ => {}
        }
        if !self.tokens.validate(raw_token)? {
            return Err(Error::Unauthorized);
        }
        match self.tokens.resolve_account(raw_token)? {
            Some(account) => Ok(Identity::Account(account.name)),
            None => Err(Error::Unauthorized),
        }
    }

    async fn resolve_basic(&self, header: &str) -> Result<Identity> {
        let username = basic_username(header).ok_or(Error::Unauthorized)?;
        let response = self
            .foreman
            .fetch_token(Some(header), Some(&username), None)
            .await?;
        if !response.is_success() {
            return Err(Error::Unauthorized);
        }
        let payload: TokenPayload = response.json()?;
        match payload.token.as_deref() {
            Some(token) if token != UNAUTHENTICATED_TOKEN && token != UNAUTHORIZED_TOKEN => {
                Ok(Identity::Account(username))
            }
            _ => Err(Error::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store};
    use crate::upstream::UpstreamResponse;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    struct StubForeman {
        token: &'static str,
        status: u16,
    }

    #[async_trait]
    impl ForemanClient for StubForeman {
        async fn fetch_token(
            &self,
            _auth_header: Option<&str>,
            _account: Option<&str>,
            _scope: Option<&str>,
        ) -> Result<UpstreamResponse> {
            Ok(UpstreamResponse {
                status: self.status,
                body: format!("{{\"token\":\"{}\"}}", self.token).into_bytes(),
                location: None,
                link: None,
                date: None,
            })
        }

        async fn fetch_account_repositories(
            &self,
            _auth_header: Option<&str>,
            _account: Option<&str>,
        ) -> Result<UpstreamResponse> {
            unimplemented!()
        }

        async fn fetch_node_repositories(&self, _node_uuid: &str) -> Result<UpstreamResponse> {
            unimplemented!()
        }
    }

    fn resolver(foreman: StubForeman) -> (IdentityResolver, TokenService) {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        let store: Arc<dyn Store> = Arc::new(store);
        let tokens = TokenService::new(store);
        (
            IdentityResolver::new(tokens.clone(), Arc::new(foreman)),
            tokens,
        )
    }

    fn ok_foreman() -> StubForeman {
        StubForeman {
            token: "issued",
            status: 200,
        }
    }

    fn basic(pair: &str) -> String {
        format!("Basic {}", STANDARD.encode(pair))
    }

    #[tokio::test]
    async fn no_credentials_is_anonymous() {
        let (resolver, _) = resolver(ok_foreman());
        let identity = resolver.resolve(None, None).await.unwrap();
        assert_eq!(identity, Identity::Anonymous);
    }

    #[tokio::test]
    async fn certificate_wins_over_token() {
        let (resolver, tokens) = resolver(ok_foreman());
        tokens
            .issue("joe", "tok1", Utc::now() + Duration::seconds(60), true)
            .unwrap();
        let pem = cert::self_signed("node-uuid");
        let identity = resolver
            .resolve(Some(&pem), Some("Bearer tok1"))
            .await
            .unwrap();
        assert_eq!(identity, Identity::Node("node-uuid".to_string()));
    }

    #[tokio::test]
    async fn valid_bearer_token_resolves_account() {
        let (resolver, tokens) = resolver(ok_foreman());
        tokens
            .issue("joe", "tok1", Utc::now() + Duration::seconds(60), true)
            .unwrap();
        let identity = resolver.resolve(None, Some("Bearer tok1")).await.unwrap();
        assert_eq!(identity, Identity::Account("joe".to_string()));
    }

    #[tokio::test]
    async fn sentinel_tokens_resolve_to_sentinels() {
        let (resolver, _) = resolver(ok_foreman());
        assert_eq!(
            resolver
                .resolve(None, Some("Bearer unauthorized"))
                .await
                .unwrap(),
            Identity::UnauthorizedToken
        );
        assert_eq!(
            resolver
                .resolve(None, Some("Bearer unauthenticated"))
                .await
                .unwrap(),
            Identity::UnauthenticatedToken
        );
    }

    #[tokio::test]
    async fn unknown_bearer_token_is_unauthorized() {
        let (resolver, _) = resolver(ok_foreman());
        let err = resolver
            .resolve(None, Some("Bearer nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[tokio::test]
    async fn basic_exchange_adopts_username_on_success() {
        let (resolver, _) = resolver(ok_foreman());
        let identity = resolver
            .resolve(None, Some(&basic("admin:changeme")))
            .await
            .unwrap();
        assert_eq!(identity, Identity::Account("admin".to_string()));
    }

    #[tokio::test]
    async fn basic_exchange_rejects_unauthenticated_result() {
        let (resolver, _) = resolver(StubForeman {
            token: "unauthenticated",
            status: 200,
        });
        let err = resolver
            .resolve(None, Some(&basic("admin:changeme")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[tokio::test]
    async fn basic_exchange_rejects_provider_failure() {
        let (resolver, _) = resolver(StubForeman {
            token: "ignored",
            status: 401,
        });
        let err = resolver
            .resolve(None, Some(&basic("admin:wrong")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }
}
