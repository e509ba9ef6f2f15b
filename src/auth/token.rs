use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::store::Store;
use crate::types::Account;

/// Raw token value the identity provider returns when credentials were
/// accepted but the account has no registry access.
pub const UNAUTHORIZED_TOKEN: &str = "unauthorized";

/// Raw token value the identity provider returns for anonymous exchanges.
pub const UNAUTHENTICATED_TOKEN: &str = "unauthenticated";

/// Hex SHA-256 digest of a raw bearer token. Only the digest is ever stored.
pub fn checksum(raw_token: &str) -> String {
    hex::encode(Sha256::digest(raw_token.as_bytes()))
}

/// Issues, validates and sweeps bearer tokens against the store.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn Store>,
}

impl TokenService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Records a freshly exchanged token for `account`. A token with the
    /// same checksum replaces the prior row. With `clear_expired` the call
    /// also sweeps every expired row.
    pub fn issue(
        &self,
        account: &str,
        raw_token: &str,
        expire_at: DateTime<Utc>,
        clear_expired: bool,
    ) -> Result<()> {
        self.store
            .insert_token(account, &checksum(raw_token), expire_at, clear_expired)
    }

    /// True iff a row with this token's checksum exists and has not expired.
    /// Empty and sentinel tokens never validate.
    pub fn validate(&self, raw_token: &str) -> Result<bool> {
        if raw_token.is_empty()
            || raw_token == UNAUTHORIZED_TOKEN
            || raw_token == UNAUTHENTICATED_TOKEN
        {
            return Ok(false);
        }
        match self.store.token(&checksum(raw_token))? {
            Some(token) => Ok(token.expire_at > Utc::now()),
            None => Ok(false),
        }
    }

    /// The account that owns this token, regardless of expiry. Callers
    /// check [`validate`](Self::validate) first.
    pub fn resolve_account(&self, raw_token: &str) -> Result<Option<Account>> {
        self.store.token_account(&checksum(raw_token))
    }
}
