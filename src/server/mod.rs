mod admin;
pub mod response;
mod router;
mod v1;
mod v2;

pub use router::{AppState, create_router};

use axum::http::{HeaderMap, header};

/// The certificate headers the fronting proxy may forward, in precedence
/// order.
const CERT_HEADERS: &[&str] = &["x-rhsm-ssl-client-cert", "ssl-client-cert"];

pub(crate) fn cert_blob(headers: &HeaderMap) -> Option<String> {
    CERT_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|blob| !blob.trim().is_empty())
    })
}

pub(crate) fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|h| !h.trim().is_empty())
}

pub(crate) fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string()
}

pub(crate) fn is_flatpak(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|agent| agent.to_ascii_lowercase().contains("flatpak"))
}
