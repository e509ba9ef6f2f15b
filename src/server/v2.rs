use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, RawQuery, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::{Value, json};

use super::response::{
    API_VERSION, API_VERSION_HEADER, ApiError, challenge_headers, name_unknown, relay, unauthorized,
    unsupported,
};
use super::router::AppState;
use super::{authorization, cert_blob, is_flatpak, request_host};
use crate::auth::{UNAUTHENTICATED_TOKEN, UNAUTHORIZED_TOKEN, basic_username, cert};
use crate::error::{Error, Result};
use crate::gateway::repository_names;
use crate::types::Identity;
use crate::upstream::{TokenPayload, UpstreamResponse};

fn api_version() -> (&'static str, HeaderValue) {
    (API_VERSION_HEADER, HeaderValue::from_static(API_VERSION))
}

async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity> {
    let cert = cert_blob(headers);
    let auth = authorization(headers);
    state.resolver.resolve(cert.as_deref(), auth.as_deref()).await
}

/// A node seen for the first time has no edges yet; fetch its repository
/// list from the identity provider and store it before answering.
async fn ensure_node_mapping(state: &AppState, uuid: &str) -> Result<()> {
    if state.gateway.node(uuid)?.is_some() {
        return Ok(());
    }
    let response = state.foreman.fetch_node_repositories(uuid).await?;
    if !response.is_success() {
        return Err(Error::upstream_status(
            response.status,
            "could not fetch node repositories",
        ));
    }
    let body: Value = response.json()?;
    let names = repository_names(body.get("repositories").unwrap_or(&Value::Null));
    state.gateway.replace_node_repositories(uuid, &names)
}

/// `GET /v2/`: upstream ping, gated on a resolved identity. The
/// "unauthorized" sentinel counts as resolved here: the client proved it
/// talked to the identity provider, it just has no access yet.
pub async fn ping(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let host = request_host(&headers);
    let identity = match resolve_identity(&state, &headers).await {
        Ok(identity) => identity,
        Err(Error::Unauthorized) => return unauthorized(&host),
        Err(err) => return ApiError::from(err).into_response(),
    };
    if !matches!(
        identity,
        Identity::Account(_) | Identity::Node(_) | Identity::UnauthorizedToken
    ) {
        return unauthorized(&host);
    }

    match state.registry.ping(&headers).await {
        Ok(upstream) => {
            let mut response = relay(upstream);
            let (name, value) = api_version();
            response.headers_mut().insert(name, value);
            response
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// `GET /index/static`: the flatpak static index. Certificate identities
/// get the upstream document with `Results` filtered down to their catalog;
/// everyone else gets it as is.
pub async fn static_index(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let upstream = match state.registry.static_index(&headers, query.as_deref()).await {
        Ok(upstream) => upstream,
        Err(err) => return ApiError::from(err).into_response(),
    };
    if upstream.status >= 400 {
        return relay(upstream);
    }

    let Some(uuid) = cert_blob(&headers).as_deref().and_then(cert::subject_common_name) else {
        return relay(upstream);
    };
    if let Err(err) = ensure_node_mapping(&state, &uuid).await {
        return ApiError::from(err).into_response();
    }
    let catalog = match state.gateway.catalog(&Identity::Node(uuid)) {
        Ok(names) => names,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let mut index: Value = match upstream.json() {
        Ok(index) => index,
        Err(err) => return ApiError::from(err).into_response(),
    };
    let Some(results) = index.get_mut("Results").and_then(Value::as_array_mut) else {
        return ApiError::bad_request("the index document has no Results key").into_response();
    };
    results.retain(|result| {
        result
            .get("Name")
            .and_then(Value::as_str)
            .is_some_and(|name| catalog.iter().any(|repo| repo == name))
    });
    Json(index).into_response()
}

#[derive(Deserialize)]
pub struct TokenParams {
    account: Option<String>,
    scope: Option<String>,
}

fn malformed_token() -> Response {
    ApiError::bad_gateway("Received malformed token response").into_response()
}

/// `GET /v2/token`: delegated token issue. The provider's body is relayed
/// verbatim; the gateway keeps only the checksum and refreshes the account's
/// repository mapping along the way.
pub async fn token(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TokenParams>,
    headers: HeaderMap,
) -> Response {
    let auth = authorization(&headers);

    // Flatpak clients omit the account param podman sends; their Basic
    // header carries the username instead.
    let mut account = params.account.clone();
    if account.is_none() && is_flatpak(&headers) {
        account = auth.as_deref().and_then(basic_username);
    }

    let upstream = match state
        .foreman
        .fetch_token(auth.as_deref(), account.as_deref(), params.scope.as_deref())
        .await
    {
        Ok(upstream) => upstream,
        Err(err) => return ApiError::from(err).into_response(),
    };
    if upstream.status != 200 {
        return relay(upstream);
    }

    let payload: TokenPayload = match upstream.json() {
        Ok(payload) => payload,
        Err(_) => return malformed_token(),
    };
    let Some(raw_token) = payload.token else {
        return malformed_token();
    };
    if raw_token == UNAUTHORIZED_TOKEN {
        return (StatusCode::UNAUTHORIZED, [api_version()], "unauthorized").into_response();
    }

    // An unauthenticated exchange still gets the provider's body back, but
    // nothing is persisted for it.
    if raw_token != UNAUTHENTICATED_TOKEN {
        let Some(account) = account.as_deref() else {
            return ApiError::bad_request("account parameter is required").into_response();
        };
        // issued_at is optional per OAuth2; fall back to the response Date.
        let Some(issued_at) = payload.issued_at.or(upstream.date) else {
            return malformed_token();
        };
        let expire_at = issued_at + Duration::seconds(payload.expires_in.unwrap_or(60));
        if let Err(err) = state.tokens.issue(account, &raw_token, expire_at, true) {
            return ApiError::from(err).into_response();
        }

        let repos = match state
            .foreman
            .fetch_account_repositories(auth.as_deref(), Some(account))
            .await
        {
            Ok(repos) => repos,
            Err(err) => return ApiError::from(err).into_response(),
        };
        if !repos.is_success() {
            return relay(repos);
        }
        let body: Value = match repos.json() {
            Ok(body) => body,
            Err(err) => return ApiError::from(err).into_response(),
        };
        let names = repository_names(body.get("repositories").unwrap_or(&Value::Null));
        if let Err(err) = state.gateway.replace_account_repositories(account, &names) {
            return ApiError::from(err).into_response();
        }
    }

    (StatusCode::OK, [api_version()], upstream.body).into_response()
}

/// `GET /v2/_catalog`: the repository names visible to the caller.
pub async fn catalog(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let host = request_host(&headers);

    if let Some(uuid) = cert_blob(&headers).as_deref().and_then(cert::subject_common_name) {
        if let Err(err) = ensure_node_mapping(&state, &uuid).await {
            return ApiError::from(err).into_response();
        }
        return match state.gateway.catalog(&Identity::Node(uuid)) {
            Ok(names) => Json(json!({ "repositories": names })).into_response(),
            Err(err) => ApiError::from(err).into_response(),
        };
    }

    let Some(auth) = authorization(&headers) else {
        return unauthorized(&host);
    };
    let identity = match state.resolver.resolve(None, Some(&auth)).await {
        Ok(identity) => identity,
        Err(Error::Unauthorized) => return unauthorized(&host),
        Err(err) => return ApiError::from(err).into_response(),
    };
    // Sentinel tokens see the public catalog; everything else needs a real
    // account behind it.
    let identity = match identity {
        Identity::Account(_) => identity,
        Identity::UnauthorizedToken | Identity::UnauthenticatedToken => Identity::Anonymous,
        _ => return unauthorized(&host),
    };

    match state.gateway.catalog(&identity) {
        Ok(names) => Json(json!({ "repositories": names })).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[derive(Deserialize)]
pub struct PullParams {
    n: Option<String>,
    last: Option<String>,
}

enum PullRequest {
    Manifest { repository: String, tag: String },
    Blob { repository: String, digest: String },
    Tags { repository: String },
}

/// Splits the `/v2/{*rest}` remainder. Repository names contain slashes, so
/// the operation keyword is found from the right.
fn parse_pull_path(rest: &str) -> Option<PullRequest> {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let len = segments.len();
    if len >= 3 && segments[len - 2] == "tags" && segments[len - 1] == "list" {
        return Some(PullRequest::Tags {
            repository: segments[..len - 2].join("/"),
        });
    }
    if len >= 3 && segments[len - 2] == "manifests" {
        return Some(PullRequest::Manifest {
            repository: segments[..len - 2].join("/"),
            tag: segments[len - 1].to_string(),
        });
    }
    if len >= 3 && segments[len - 2] == "blobs" {
        return Some(PullRequest::Blob {
            repository: segments[..len - 2].join("/"),
            digest: segments[len - 1].to_string(),
        });
    }
    None
}

/// Decides whether this request may pull from `repository`. Denials answer
/// NAME_UNKNOWN regardless of why, so callers cannot probe for existence.
async fn authorize_pull(
    state: &AppState,
    headers: &HeaderMap,
    repository: &str,
) -> std::result::Result<(), Response> {
    let deny = || {
        let mut response = name_unknown();
        response
            .headers_mut()
            .extend(challenge_headers(&request_host(headers)));
        response
    };

    if let Some(uuid) = cert_blob(headers).as_deref().and_then(cert::subject_common_name) {
        if let Err(err) = ensure_node_mapping(state, &uuid).await {
            return Err(ApiError::from(err).into_response());
        }
        return match state
            .gateway
            .authorized_for_repo(repository, &Identity::Node(uuid))
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(deny()),
            Err(err) => Err(ApiError::from(err).into_response()),
        };
    }

    let auth = authorization(headers);
    let identity = match state.resolver.resolve(None, auth.as_deref()).await {
        Ok(Identity::Account(name)) => Identity::Account(name),
        // An unusable credential still reaches public repositories.
        Ok(_) | Err(Error::Unauthorized) => Identity::Anonymous,
        Err(err) => return Err(ApiError::from(err).into_response()),
    };

    match state.gateway.authorized_for_repo(repository, &identity) {
        Ok(true) => Ok(()),
        Ok(false) => Err(deny()),
        Err(err) => Err(ApiError::from(err).into_response()),
    }
}

fn redirect_to_client(upstream: &UpstreamResponse, client_endpoint: &str) -> Option<Response> {
    let location = upstream.location.as_deref()?;
    let mut target = reqwest::Url::parse(location).ok()?;
    let client = reqwest::Url::parse(client_endpoint).ok()?;
    target.set_host(client.host_str()).ok()?;
    Some(Redirect::temporary(target.as_str()).into_response())
}

/// `GET /v2/{repo...}/manifests/{tag}`, `/blobs/{digest}` and `/tags/list`.
/// Content responses are redirected at the client endpoint; the bytes never
/// flow through the gateway.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Path(rest): Path<String>,
    Query(params): Query<PullParams>,
    headers: HeaderMap,
) -> Response {
    let Some(request) = parse_pull_path(&rest) else {
        return name_unknown();
    };
    let repository = match &request {
        PullRequest::Manifest { repository, .. }
        | PullRequest::Blob { repository, .. }
        | PullRequest::Tags { repository } => repository.clone(),
    };
    if let Err(denied) = authorize_pull(&state, &headers, &repository).await {
        return denied;
    }

    let upstream = match &request {
        PullRequest::Manifest { repository, tag } => {
            state.registry.manifests(repository, tag, &headers).await
        }
        PullRequest::Blob { repository, digest } => {
            state.registry.blobs(repository, digest, &headers).await
        }
        PullRequest::Tags { repository } => {
            state
                .registry
                .tags(repository, &headers, params.n.as_deref(), params.last.as_deref())
                .await
        }
    };
    let upstream = match upstream {
        Ok(upstream) => upstream,
        Err(err) => return ApiError::from(err).into_response(),
    };

    match request {
        PullRequest::Tags { .. } => {
            let link = upstream
                .link
                .as_deref()
                .and_then(|l| HeaderValue::from_str(l).ok())
                .unwrap_or(HeaderValue::from_static(""));
            let mut response = relay(upstream);
            response.headers_mut().insert("link", link);
            response
        }
        _ => {
            if upstream.status >= 400 {
                return relay(upstream);
            }
            redirect_to_client(&upstream, &state.client_endpoint)
                .unwrap_or_else(|| relay(upstream))
        }
    }
}

/// Push-side endpoints are refused outright; this is a pull-through gateway.
pub async fn push_rejected() -> Response {
    unsupported()
}
