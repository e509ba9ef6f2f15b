use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named image repository fronted by the gateway. Repositories with
/// `auth_required = false` are visible to every caller, anonymous included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub auth_required: bool,
}

/// A logged-in account identity, created implicitly the first time a token
/// or mapping references its name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
}

/// A managed endpoint authenticated by client certificate. The uuid is the
/// certificate's Subject CN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub uuid: String,
}

/// A bearer token issued by the upstream identity provider. Only the SHA-256
/// checksum of the raw token is persisted.
#[derive(Debug, Clone)]
pub struct AuthenticationToken {
    pub id: i64,
    pub account_id: i64,
    pub token_checksum: String,
    pub expire_at: DateTime<Utc>,
}

/// One entry of a repository-list replace: a name plus its visibility flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEntry {
    pub name: String,
    pub auth_required: bool,
}

impl RepositoryEntry {
    pub fn new(name: impl Into<String>, auth_required: bool) -> Self {
        Self {
            name: name.into(),
            auth_required,
        }
    }
}
