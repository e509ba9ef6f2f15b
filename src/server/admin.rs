use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    response::IntoResponse,
};
use serde_json::{Value, json};

use super::response::ApiError;
use super::router::AppState;
use crate::gateway::{mapping_entries, node_uuids, repository_entries};

/// Extractor guarding the administrative surface. The caller must present
/// the configured key as a bearer credential; an unconfigured key refuses
/// everything.
pub struct RequireAdmin;

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_key.as_deref() else {
            return Err(ApiError::unauthorized("Administrative API is disabled"));
        };
        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return Err(ApiError::unauthorized("Invalid administrative key"));
        }
        Ok(RequireAdmin)
    }
}

pub async fn list_accounts(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let names = state.gateway.account_names()?;
    Ok(Json(json!({ "users": names })))
}

pub async fn replace_repository_list(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    // A missing list clears the table, matching the provider's behavior
    // when no repositories are published.
    let entries = match payload.get("repositories") {
        Some(repositories) => repository_entries(repositories)?,
        None => Vec::new(),
    };
    state.gateway.replace_repository_list(&entries)?;
    Ok(Json(json!({})))
}

pub async fn replace_account_mapping(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let mapping = mapping_entries(&payload, "users")?;
    state.gateway.replace_account_mapping(&mapping)?;
    Ok(Json(json!({})))
}

pub async fn replace_node_mapping(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let mapping = mapping_entries(&payload, "hosts")?;
    state.gateway.replace_node_mapping(&mapping)?;
    Ok(Json(json!({})))
}

pub async fn replace_nodes(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let uuids = node_uuids(&payload);
    state.gateway.replace_nodes(&uuids)?;
    Ok(Json(json!({})))
}

/// Scoped node-mapping refresh: each listed node's edges are rewritten in
/// turn, creating nodes not seen before.
pub async fn replace_node_repositories(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let mapping = mapping_entries(&payload, "hosts")?;
    for (uuid, repos) in &mapping {
        state.gateway.replace_node_repositories(uuid, repos)?;
    }
    Ok(Json(json!({})))
}
