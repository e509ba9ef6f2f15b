use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use super::authorization;
use super::response::{API_VERSION, ApiError, relay};
use super::router::AppState;
use crate::error::Error;
use crate::types::Identity;

/// `GET /v1/_ping`: plain upstream ping, no identity gate.
pub async fn ping(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match state.registry.ping(&headers).await {
        Ok(upstream) => relay(upstream),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    n: Option<String>,
}

/// `GET /v1/search`: legacy search. v2-capable clients get a 404 so they
/// fall back to `/v2/_catalog`, which is podman's probing behavior.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
    headers: HeaderMap,
) -> Response {
    if headers
        .get("Docker-Distribution-Api-Version")
        .and_then(|v| v.to_str().ok())
        == Some(API_VERSION)
    {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }

    let limit = match params.n.as_deref() {
        Some(n) => match n.parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => return ApiError::bad_request("n must be an integer").into_response(),
        },
        None => None,
    };

    let identity = match authorization(&headers) {
        Some(auth) => match state.resolver.resolve(None, Some(&auth)).await {
            Ok(Identity::Account(name)) => Identity::Account(name),
            Ok(_) | Err(Error::Unauthorized) => {
                return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
            }
            Err(err) => return ApiError::from(err).into_response(),
        },
        None => Identity::Anonymous,
    };

    match state
        .gateway
        .search(&identity, params.q.as_deref(), limit)
    {
        Ok(names) => Json(json!({
            "num_results": names.len(),
            "query": params.q,
            "results": names
                .iter()
                .map(|name| json!({ "description": "", "name": name }))
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
