//! # Gangway
//!
//! An authorization gateway for a private container-image registry, usable
//! both as a standalone binary and as a library.
//!
//! Gangway sits between container clients (podman, docker, flatpak) and an
//! upstream content store. It decides per request whether the caller (an
//! anonymous puller, a token-holding account, or a certificate-bearing
//! managed node) may see a repository, serves the identity-scoped catalog,
//! and keeps the identity-to-repository visibility graph consistent under
//! concurrent bulk updates pushed by the identity provider.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! gangway = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gangway::auth::{IdentityResolver, TokenService};
//! use gangway::config::Settings;
//! use gangway::gateway::Gateway;
//! use gangway::server::{AppState, create_router};
//! use gangway::upstream::{HttpForemanClient, HttpRegistryClient};
//!
//! let settings = Settings::default();
//! let store = gangway::store::open(&settings).unwrap();
//! let tokens = TokenService::new(store.clone());
//! let foreman = Arc::new(HttpForemanClient::new(&settings).unwrap());
//! let registry = Arc::new(HttpRegistryClient::new(&settings).unwrap());
//!
//! let state = Arc::new(AppState {
//!     gateway: Gateway::new(store.clone()),
//!     resolver: IdentityResolver::new(tokens.clone(), foreman.clone()),
//!     tokens,
//!     store,
//!     foreman,
//!     registry,
//!     client_endpoint: settings.client_endpoint().to_string(),
//!     admin_key: settings.admin_key.clone(),
//! });
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the binary entrypoint's dependencies.
//!   Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod server;
pub mod store;
pub mod types;
pub mod upstream;
