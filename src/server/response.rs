use axum::{
    Json,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::Error;

pub const API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";
pub const API_VERSION: &str = "registry/2.0";

/// Registry protocol error body, per the distribution spec.
fn registry_error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({ "errors": [{ "code": code, "message": message }] });
    (status, Json(body)).into_response()
}

/// 404 NAME_UNKNOWN. Used for unknown and denied repositories alike so a
/// denied caller cannot distinguish the two.
pub fn name_unknown() -> Response {
    registry_error(
        StatusCode::NOT_FOUND,
        "NAME_UNKNOWN",
        "Repository name unknown",
    )
}

/// 404 UNSUPPORTED for every push-side operation.
pub fn unsupported() -> Response {
    registry_error(
        StatusCode::NOT_FOUND,
        "UNSUPPORTED",
        "Pushing content is unsupported",
    )
}

/// The challenge headers a v2 client needs to come back with a token.
pub fn challenge_headers(host: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = API_VERSION.parse() {
        headers.insert(API_VERSION_HEADER, value);
    }
    let challenge = format!(
        "Bearer realm=\"https://{host}/v2/token\",service=\"{host}\",scope=\"repository:registry:pull,push\""
    );
    if let Ok(value) = challenge.parse() {
        headers.insert(header::WWW_AUTHENTICATE, value);
    }
    headers
}

/// 401 with the bearer challenge attached.
pub fn unauthorized(host: &str) -> Response {
    (StatusCode::UNAUTHORIZED, challenge_headers(host), "unauthorized").into_response()
}

/// Relays an upstream status and body verbatim.
pub fn relay(upstream: crate::upstream::UpstreamResponse) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, upstream.body).into_response()
}

/// API error for the administrative surface.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "data": null, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                message: "Not found".to_string(),
            },
            Error::Unauthorized => Self::unauthorized("Unauthorized"),
            Error::InvalidInput(message) => Self::bad_request(message),
            Error::Conflict(message) => Self::internal(message),
            Error::Upstream { status, message } => Self::bad_gateway(match status {
                Some(status) => format!("Upstream returned {status}: {message}"),
                None => message,
            }),
            _ => Self::internal("Internal server error"),
        }
    }
}
