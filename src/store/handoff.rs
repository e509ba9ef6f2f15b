use std::path::Path;

use chrono::{DateTime, Utc};

use super::{SqliteStore, Store};
use crate::error::Result;
use crate::types::RepositoryEntry;

/// A full, backend-neutral copy of the gateway's state. Rows reference each
/// other by name/uuid so ids never leak across backends.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub repositories: Vec<RepositoryEntry>,
    pub accounts: Vec<String>,
    pub nodes: Vec<String>,
    pub tokens: Vec<SnapshotToken>,
    pub account_edges: Vec<(String, String)>,
    pub node_edges: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct SnapshotToken {
    pub account: String,
    pub checksum: String,
    pub expire_at: DateTime<Utc>,
}

/// One-shot handoff from an embedded SQLite file to the configured
/// client/server store. Runs only when the target is still empty; the SQLite
/// file is renamed aside afterwards so the handoff never repeats.
pub fn run(target: &dyn Store, sqlite_path: &Path) -> Result<()> {
    if !sqlite_path.exists() {
        return Ok(());
    }
    if !target.is_empty()? {
        tracing::debug!("target store already populated, skipping handoff");
        return Ok(());
    }

    tracing::info!("migrating data from {} to the client/server store", sqlite_path.display());

    let source = SqliteStore::open(sqlite_path)?;
    source.migrate()?;
    let snapshot = source.export_snapshot()?;
    // Close the source before renaming so the WAL is checkpointed into the
    // retired file.
    drop(source);
    target.import_snapshot(&snapshot)?;

    let mut retired = sqlite_path.as_os_str().to_owned();
    retired.push(".migrated");
    std::fs::rename(sqlite_path, &retired)?;
    tracing::info!("handoff complete, embedded file retired to {:?}", retired);

    Ok(())
}
