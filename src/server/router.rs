use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Router,
    routing::{get, put},
};

use super::{admin, v1, v2};
use crate::auth::{IdentityResolver, TokenService};
use crate::gateway::Gateway;
use crate::store::Store;
use crate::upstream::{ForemanClient, RegistryClient};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateway: Gateway,
    pub tokens: TokenService,
    pub resolver: IdentityResolver,
    pub foreman: Arc<dyn ForemanClient>,
    pub registry: Arc<dyn RegistryClient>,
    /// Endpoint whose host replaces the upstream's in redirect locations.
    pub client_endpoint: String,
    /// Bearer key for the administrative surface. Unset disables it.
    pub admin_key: Option<String>,
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/index/static", get(v2::static_index))
        .route("/v1/_ping", get(v1::ping))
        .route("/v1/search", get(v1::search))
        .route("/v2", get(v2::ping))
        .route("/v2/", get(v2::ping))
        .route("/v2/token", get(v2::token))
        .route("/v2/_catalog", get(v2::catalog))
        .route(
            "/v2/{*rest}",
            get(v2::proxy)
                .put(v2::push_rejected)
                .post(v2::push_rejected)
                .patch(v2::push_rejected),
        )
        .route("/users", get(admin::list_accounts))
        .route("/repository_list", put(admin::replace_repository_list))
        .route(
            "/user_repository_mapping",
            put(admin::replace_account_mapping),
        )
        .route("/host_repository_mapping", put(admin::replace_node_mapping))
        .route("/update_hosts", put(admin::replace_nodes))
        .route(
            "/update_host_repositories",
            put(admin::replace_node_repositories),
        )
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
