mod handoff;
mod postgres;
mod schema;
mod sqlite;

pub use handoff::{Snapshot, SnapshotToken};
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::error::Result;
use crate::types::*;

/// Attempts for a serializable bulk replace before giving up with
/// `Error::Conflict`.
pub const MAX_REPLACE_ATTEMPTS: u32 = 10;

/// Store defines the database interface. Bulk `replace_*` operations run as a
/// single transaction at the strictest isolation the backend offers, retried
/// on write conflicts up to [`MAX_REPLACE_ATTEMPTS`] times.
pub trait Store: Send + Sync {
    /// Applies any pending schema migrations, each at most once.
    fn migrate(&self) -> Result<()>;

    // Repository operations
    fn repository(&self, name: &str) -> Result<Option<Repository>>;
    fn replace_repositories(&self, entries: &[RepositoryEntry]) -> Result<()>;

    // Account operations
    fn find_or_create_account(&self, name: &str) -> Result<Account>;
    fn account_names(&self) -> Result<Vec<String>>;

    // Node operations
    fn find_or_create_node(&self, uuid: &str) -> Result<Node>;
    fn node(&self, uuid: &str) -> Result<Option<Node>>;
    fn replace_nodes(&self, uuids: &[String]) -> Result<()>;

    // Authorization lookups
    fn account_authorized(&self, account_name: &str, repository_name: &str) -> Result<bool>;
    fn node_authorized(&self, node_uuid: &str, repository_name: &str) -> Result<bool>;

    // Catalog queries (name-ascending, deduplicated)
    fn catalog_anonymous(&self) -> Result<Vec<String>>;
    fn catalog_account(&self, account_name: &str) -> Result<Vec<String>>;
    fn catalog_node(&self, node_uuid: &str) -> Result<Vec<String>>;

    // Mapping replaces. Whole-table variants rewrite every edge; scoped
    // variants touch a single identity's edges. Only repositories with
    // auth_required = true ever gain an edge.
    fn replace_account_mapping(&self, mapping: &[(String, Vec<String>)]) -> Result<()>;
    fn replace_account_repositories(&self, account_name: &str, repos: &[String]) -> Result<()>;
    fn replace_node_mapping(&self, mapping: &[(String, Vec<String>)]) -> Result<()>;
    fn replace_node_repositories(&self, node_uuid: &str, repos: &[String]) -> Result<()>;

    // Token operations
    fn insert_token(
        &self,
        account_name: &str,
        checksum: &str,
        expire_at: DateTime<Utc>,
        clear_expired: bool,
    ) -> Result<()>;
    fn token(&self, checksum: &str) -> Result<Option<AuthenticationToken>>;
    fn token_account(&self, checksum: &str) -> Result<Option<Account>>;

    // Backend handoff support
    fn is_empty(&self) -> Result<bool>;
    fn export_snapshot(&self) -> Result<Snapshot>;
    fn import_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Opens the configured backend and brings its schema current. With a
/// Postgres URL configured this also performs the one-shot data handoff from
/// a pre-existing SQLite file.
pub fn open(settings: &Settings) -> Result<Arc<dyn Store>> {
    match &settings.postgres_url {
        Some(url) => {
            let store = PostgresStore::connect(url)?;
            store.migrate()?;
            handoff::run(&store, &settings.sqlite_path)?;
            Ok(Arc::new(store))
        }
        None => {
            if let Some(parent) = settings.sqlite_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteStore::open(&settings.sqlite_path)?;
            store.migrate()?;
            Ok(Arc::new(store))
        }
    }
}
