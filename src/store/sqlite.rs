use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::schema::{CREATE_SCHEMA_MIGRATIONS_SQLITE, MIGRATIONS};
use super::{MAX_REPLACE_ATTEMPTS, Snapshot, Store, handoff::SnapshotToken};
use crate::error::{Error, Result};
use crate::types::*;

/// Embedded single-file backend.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` inside an immediate-mode transaction (SQLite's strongest
    /// writer isolation), retrying on lock contention up to the replace
    /// budget, then surfacing `Error::Conflict`.
    fn replace_tx<T>(&self, f: impl Fn(&rusqlite::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn();
        for attempt in 1..=MAX_REPLACE_ATTEMPTS {
            let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
                Ok(tx) => tx,
                Err(e) if is_busy(&e) && attempt < MAX_REPLACE_ATTEMPTS => {
                    std::thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let outcome = f(&tx).and_then(|v| {
                tx.commit()?;
                Ok(v)
            });

            match outcome {
                Ok(v) => return Ok(v),
                Err(Error::Sqlite(e)) if is_busy(&e) && attempt < MAX_REPLACE_ATTEMPTS => {
                    std::thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(
            "bulk replace retry budget exhausted".to_string(),
        ))
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(ffi, _)
            if ffi.code == rusqlite::ErrorCode::DatabaseBusy
                || ffi.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn account_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM accounts WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
    .map_err(Error::from)
}

fn ensure_account(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO accounts (name) VALUES (?1)",
        params![name],
    )?;
    account_id(conn, name)?.ok_or(Error::NotFound)
}

fn node_id(conn: &Connection, uuid: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM nodes WHERE uuid = ?1",
        params![uuid],
        |row| row.get(0),
    )
    .optional()
    .map_err(Error::from)
}

fn ensure_node(conn: &Connection, uuid: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO nodes (uuid) VALUES (?1)",
        params![uuid],
    )?;
    node_id(conn, uuid)?.ok_or(Error::NotFound)
}

/// Resolves a repository id, restricted to auth-required repositories since
/// universally visible ones never carry mapping edges.
fn auth_repository_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM repositories WHERE name = ?1 AND auth_required = 1",
        params![name],
        |row| row.get(0),
    )
    .optional()
    .map_err(Error::from)
}

impl Store for SqliteStore {
    fn migrate(&self) -> Result<()> {
        let mut conn = self.conn();
        conn.execute(CREATE_SCHEMA_MIGRATIONS_SQLITE, [])?;

        for migration in MIGRATIONS {
            let applied: bool = conn
                .query_row(
                    "SELECT 1 FROM schema_migrations WHERE version = ?1",
                    params![migration.version],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if applied {
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(migration.sqlite)?;
            tx.execute(
                "INSERT INTO schema_migrations (version) VALUES (?1)",
                params![migration.version],
            )?;
            tx.commit()?;
            tracing::info!("applied migration {} ({})", migration.version, migration.name);
        }
        Ok(())
    }

    fn repository(&self, name: &str) -> Result<Option<Repository>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, auth_required FROM repositories WHERE name = ?1",
            params![name],
            |row| {
                Ok(Repository {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    auth_required: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn replace_repositories(&self, entries: &[RepositoryEntry]) -> Result<()> {
        self.replace_tx(|tx| {
            // Explicit delete of dependent edges first; cascades are not
            // relied on across backends.
            tx.execute("DELETE FROM accounts_repositories", [])?;
            tx.execute("DELETE FROM nodes_repositories", [])?;
            tx.execute("DELETE FROM repositories", [])?;

            let mut stmt =
                tx.prepare("INSERT INTO repositories (name, auth_required) VALUES (?1, ?2)")?;
            for entry in entries {
                stmt.execute(params![entry.name, entry.auth_required])?;
            }
            Ok(())
        })
    }

    fn find_or_create_account(&self, name: &str) -> Result<Account> {
        let conn = self.conn();
        let id = ensure_account(&conn, name)?;
        Ok(Account {
            id,
            name: name.to_string(),
        })
    }

    fn account_names(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM accounts ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn find_or_create_node(&self, uuid: &str) -> Result<Node> {
        let conn = self.conn();
        let id = ensure_node(&conn, uuid)?;
        Ok(Node {
            id,
            uuid: uuid.to_string(),
        })
    }

    fn node(&self, uuid: &str) -> Result<Option<Node>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, uuid FROM nodes WHERE uuid = ?1",
            params![uuid],
            |row| {
                Ok(Node {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn replace_nodes(&self, uuids: &[String]) -> Result<()> {
        self.replace_tx(|tx| {
            tx.execute("DELETE FROM nodes", [])?;
            let mut stmt = tx.prepare("INSERT INTO nodes (uuid) VALUES (?1)")?;
            for uuid in uuids {
                stmt.execute(params![uuid])?;
            }
            Ok(())
        })
    }

    fn account_authorized(&self, account_name: &str, repository_name: &str) -> Result<bool> {
        let conn = self.conn();
        let linked: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM accounts_repositories ar
                 JOIN accounts a ON a.id = ar.account_id
                 JOIN repositories r ON r.id = ar.repository_id
                 WHERE a.name = ?1 AND r.name = ?2",
                params![account_name, repository_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(linked.is_some())
    }

    fn node_authorized(&self, node_uuid: &str, repository_name: &str) -> Result<bool> {
        // The node mapping may be rewritten concurrently, so this check runs
        // under the same isolation as the mutations.
        self.replace_tx(|tx| {
            let linked: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM nodes_repositories nr
                     JOIN nodes n ON n.id = nr.node_id
                     JOIN repositories r ON r.id = nr.repository_id
                     WHERE n.uuid = ?1 AND r.name = ?2",
                    params![node_uuid, repository_name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(linked.is_some())
        })
    }

    fn catalog_anonymous(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name FROM repositories WHERE auth_required = 0 ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn catalog_account(&self, account_name: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT r.name FROM repositories r
             LEFT JOIN accounts_repositories ar ON ar.repository_id = r.id
             LEFT JOIN accounts a ON a.id = ar.account_id
             WHERE r.auth_required = 0 OR a.name = ?1
             ORDER BY r.name",
        )?;
        let rows = stmt.query_map(params![account_name], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn catalog_node(&self, node_uuid: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT r.name FROM repositories r
             LEFT JOIN nodes_repositories nr ON nr.repository_id = r.id
             LEFT JOIN nodes n ON n.id = nr.node_id
             WHERE r.auth_required = 0 OR n.uuid = ?1
             ORDER BY r.name",
        )?;
        let rows = stmt.query_map(params![node_uuid], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn replace_account_mapping(&self, mapping: &[(String, Vec<String>)]) -> Result<()> {
        self.replace_tx(|tx| {
            let mut edges = Vec::new();
            for (account_name, repos) in mapping {
                let account_id = ensure_account(tx, account_name)?;
                for repo_name in repos {
                    if let Some(repo_id) = auth_repository_id(tx, repo_name)? {
                        edges.push((account_id, repo_id));
                    }
                }
            }

            tx.execute("DELETE FROM accounts_repositories", [])?;
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO accounts_repositories (account_id, repository_id)
                 VALUES (?1, ?2)",
            )?;
            for (account_id, repo_id) in edges {
                stmt.execute(params![account_id, repo_id])?;
            }
            Ok(())
        })
    }

    fn replace_account_repositories(&self, account_name: &str, repos: &[String]) -> Result<()> {
        self.replace_tx(|tx| {
            let account_id = ensure_account(tx, account_name)?;
            tx.execute(
                "DELETE FROM accounts_repositories WHERE account_id = ?1",
                params![account_id],
            )?;
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO accounts_repositories (account_id, repository_id)
                 VALUES (?1, ?2)",
            )?;
            for repo_name in repos {
                if let Some(repo_id) = auth_repository_id(tx, repo_name)? {
                    stmt.execute(params![account_id, repo_id])?;
                }
            }
            Ok(())
        })
    }

    fn replace_node_mapping(&self, mapping: &[(String, Vec<String>)]) -> Result<()> {
        self.replace_tx(|tx| {
            let mut edges = Vec::new();
            for (uuid, repos) in mapping {
                // Unknown nodes are skipped, not an error.
                let Some(node_id) = node_id(tx, uuid)? else {
                    continue;
                };
                for repo_name in repos {
                    if let Some(repo_id) = auth_repository_id(tx, repo_name)? {
                        edges.push((node_id, repo_id));
                    }
                }
            }

            tx.execute("DELETE FROM nodes_repositories", [])?;
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO nodes_repositories (node_id, repository_id)
                 VALUES (?1, ?2)",
            )?;
            for (node_id, repo_id) in edges {
                stmt.execute(params![node_id, repo_id])?;
            }
            Ok(())
        })
    }

    fn replace_node_repositories(&self, node_uuid: &str, repos: &[String]) -> Result<()> {
        self.replace_tx(|tx| {
            let node_id = ensure_node(tx, node_uuid)?;
            tx.execute(
                "DELETE FROM nodes_repositories WHERE node_id = ?1",
                params![node_id],
            )?;
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO nodes_repositories (node_id, repository_id)
                 VALUES (?1, ?2)",
            )?;
            for repo_name in repos {
                if let Some(repo_id) = auth_repository_id(tx, repo_name)? {
                    stmt.execute(params![node_id, repo_id])?;
                }
            }
            Ok(())
        })
    }

    fn insert_token(
        &self,
        account_name: &str,
        checksum: &str,
        expire_at: DateTime<Utc>,
        clear_expired: bool,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let account_id = ensure_account(&tx, account_name)?;

        // Re-issue semantics: a colliding checksum replaces the prior row.
        tx.execute(
            "DELETE FROM authentication_tokens WHERE token_checksum = ?1",
            params![checksum],
        )?;
        tx.execute(
            "INSERT INTO authentication_tokens (account_id, token_checksum, expire_at)
             VALUES (?1, ?2, ?3)",
            params![account_id, checksum, format_datetime(&expire_at)],
        )?;

        if clear_expired {
            tx.execute(
                "DELETE FROM authentication_tokens WHERE expire_at < ?1",
                params![format_datetime(&Utc::now())],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn token(&self, checksum: &str) -> Result<Option<AuthenticationToken>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, account_id, token_checksum, expire_at
             FROM authentication_tokens WHERE token_checksum = ?1",
            params![checksum],
            |row| {
                Ok(AuthenticationToken {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    token_checksum: row.get(2)?,
                    expire_at: parse_datetime(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn token_account(&self, checksum: &str) -> Result<Option<Account>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT a.id, a.name FROM accounts a
             JOIN authentication_tokens t ON t.account_id = a.id
             WHERE t.token_checksum = ?1",
            params![checksum],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn is_empty(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM repositories)
                  + (SELECT COUNT(*) FROM accounts)
                  + (SELECT COUNT(*) FROM nodes)
                  + (SELECT COUNT(*) FROM authentication_tokens)",
            [],
            |row| row.get(0),
        )?;
        Ok(count == 0)
    }

    fn export_snapshot(&self) -> Result<Snapshot> {
        let conn = self.conn();

        let mut stmt =
            conn.prepare("SELECT name, auth_required FROM repositories ORDER BY name")?;
        let repositories = stmt
            .query_map([], |row| {
                Ok(RepositoryEntry {
                    name: row.get(0)?,
                    auth_required: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare("SELECT name FROM accounts ORDER BY name")?;
        let accounts = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let mut stmt = conn.prepare("SELECT uuid FROM nodes ORDER BY uuid")?;
        let nodes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT a.name, t.token_checksum, t.expire_at
             FROM authentication_tokens t JOIN accounts a ON a.id = t.account_id",
        )?;
        let tokens = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(account, checksum, expire_at)| SnapshotToken {
                account,
                checksum,
                expire_at: parse_datetime(&expire_at),
            })
            .collect();

        let mut stmt = conn.prepare(
            "SELECT a.name, r.name FROM accounts_repositories ar
             JOIN accounts a ON a.id = ar.account_id
             JOIN repositories r ON r.id = ar.repository_id",
        )?;
        let account_edges = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT n.uuid, r.name FROM nodes_repositories nr
             JOIN nodes n ON n.id = nr.node_id
             JOIN repositories r ON r.id = nr.repository_id",
        )?;
        let node_edges = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Snapshot {
            repositories,
            accounts,
            nodes,
            tokens,
            account_edges,
            node_edges,
        })
    }

    fn import_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        import_into_sqlite(&tx, snapshot)?;
        tx.commit()?;
        Ok(())
    }
}

fn import_into_sqlite(tx: &rusqlite::Transaction<'_>, snapshot: &Snapshot) -> Result<()> {
    for entry in &snapshot.repositories {
        tx.execute(
            "INSERT INTO repositories (name, auth_required) VALUES (?1, ?2)",
            params![entry.name, entry.auth_required],
        )?;
    }
    for name in &snapshot.accounts {
        ensure_account(tx, name)?;
    }
    for uuid in &snapshot.nodes {
        ensure_node(tx, uuid)?;
    }
    for token in &snapshot.tokens {
        let account_id = ensure_account(tx, &token.account)?;
        tx.execute(
            "INSERT INTO authentication_tokens (account_id, token_checksum, expire_at)
             VALUES (?1, ?2, ?3)",
            params![account_id, token.checksum, format_datetime(&token.expire_at)],
        )?;
    }
    for (account, repo) in &snapshot.account_edges {
        tx.execute(
            "INSERT OR IGNORE INTO accounts_repositories (account_id, repository_id)
             SELECT a.id, r.id FROM accounts a, repositories r
             WHERE a.name = ?1 AND r.name = ?2",
            params![account, repo],
        )?;
    }
    for (uuid, repo) in &snapshot.node_edges {
        tx.execute(
            "INSERT OR IGNORE INTO nodes_repositories (node_id, repository_id)
             SELECT n.id, r.id FROM nodes n, repositories r
             WHERE n.uuid = ?1 AND r.name = ?2",
            params![uuid, repo],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn migrate_is_idempotent() {
        let store = store();
        store.migrate().unwrap();

        let conn = store.conn();
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }

    #[test]
    fn migrate_creates_all_tables() {
        let store = store();
        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "repositories",
            "accounts",
            "nodes",
            "accounts_repositories",
            "nodes_repositories",
            "authentication_tokens",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn replace_repositories_clears_stale_edges() {
        let store = store();
        store
            .replace_repositories(&[RepositoryEntry::new("old", true)])
            .unwrap();
        store
            .replace_account_repositories("joe", &["old".to_string()])
            .unwrap();
        assert!(store.account_authorized("joe", "old").unwrap());

        store
            .replace_repositories(&[
                RepositoryEntry::new("a", false),
                RepositoryEntry::new("b", true),
            ])
            .unwrap();

        assert!(store.repository("old").unwrap().is_none());
        assert!(!store.account_authorized("joe", "old").unwrap());
        assert_eq!(store.catalog_anonymous().unwrap(), vec!["a"]);
    }

    #[test]
    fn scoped_account_replace_leaves_other_accounts_alone() {
        let store = store();
        store
            .replace_repositories(&[
                RepositoryEntry::new("r1", true),
                RepositoryEntry::new("r2", true),
            ])
            .unwrap();
        store
            .replace_account_repositories("u1", &["r1".to_string()])
            .unwrap();
        store
            .replace_account_repositories("u2", &["r2".to_string()])
            .unwrap();

        store
            .replace_account_repositories("u1", &["r2".to_string()])
            .unwrap();

        assert!(!store.account_authorized("u1", "r1").unwrap());
        assert!(store.account_authorized("u1", "r2").unwrap());
        assert!(store.account_authorized("u2", "r2").unwrap());
    }

    #[test]
    fn mapping_replace_skips_public_repositories() {
        let store = store();
        store
            .replace_repositories(&[
                RepositoryEntry::new("public", false),
                RepositoryEntry::new("private", true),
            ])
            .unwrap();
        store
            .replace_account_repositories(
                "joe",
                &["public".to_string(), "private".to_string()],
            )
            .unwrap();

        assert!(store.account_authorized("joe", "private").unwrap());
        assert!(!store.account_authorized("joe", "public").unwrap());
    }

    #[test]
    fn node_mapping_skips_unknown_nodes() {
        let store = store();
        store
            .replace_repositories(&[RepositoryEntry::new("r1", true)])
            .unwrap();
        store.find_or_create_node("known").unwrap();

        store
            .replace_node_mapping(&[
                ("known".to_string(), vec!["r1".to_string()]),
                ("unknown".to_string(), vec!["r1".to_string()]),
            ])
            .unwrap();

        assert!(store.node_authorized("known", "r1").unwrap());
        assert!(!store.node_authorized("unknown", "r1").unwrap());
        assert!(store.node("unknown").unwrap().is_none());
    }

    #[test]
    fn find_or_create_node_is_idempotent() {
        let store = store();
        let first = store.find_or_create_node("uuid-1").unwrap();
        let second = store.find_or_create_node("uuid-1").unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn token_reissue_replaces_prior_row() {
        let store = store();
        let future = Utc::now() + chrono::Duration::seconds(60);
        store.insert_token("joe", "abc", future, true).unwrap();
        store.insert_token("joe", "abc", future, true).unwrap();

        let conn = store.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM authentication_tokens WHERE token_checksum = 'abc'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn expired_tokens_are_swept_on_issue() {
        let store = store();
        let past = Utc::now() - chrono::Duration::seconds(60);
        store.insert_token("joe", "stale", past, false).unwrap();
        assert!(store.token("stale").unwrap().is_some());

        let future = Utc::now() + chrono::Duration::seconds(60);
        store.insert_token("joe", "fresh", future, true).unwrap();

        assert!(store.token("stale").unwrap().is_none());
        assert!(store.token("fresh").unwrap().is_some());
    }

    #[test]
    fn token_account_ignores_expiry() {
        let store = store();
        let past = Utc::now() - chrono::Duration::seconds(60);
        store.insert_token("joe", "old", past, false).unwrap();

        let account = store.token_account("old").unwrap().unwrap();
        assert_eq!(account.name, "joe");
    }

    #[test]
    fn snapshot_round_trip() {
        let source = store();
        source
            .replace_repositories(&[
                RepositoryEntry::new("pub", false),
                RepositoryEntry::new("priv", true),
            ])
            .unwrap();
        source
            .replace_account_repositories("joe", &["priv".to_string()])
            .unwrap();
        source.find_or_create_node("node-1").unwrap();
        source
            .replace_node_repositories("node-1", &["priv".to_string()])
            .unwrap();
        source
            .insert_token("joe", "sum", Utc::now() + chrono::Duration::seconds(60), false)
            .unwrap();

        let snapshot = source.export_snapshot().unwrap();
        let target = store();
        target.import_snapshot(&snapshot).unwrap();

        assert!(!target.is_empty().unwrap());
        assert!(target.account_authorized("joe", "priv").unwrap());
        assert!(target.node_authorized("node-1", "priv").unwrap());
        assert!(target.token("sum").unwrap().is_some());
        assert_eq!(target.catalog_anonymous().unwrap(), vec!["pub"]);
    }

    #[test]
    fn empty_store_reports_empty() {
        let store = store();
        assert!(store.is_empty().unwrap());
        store.find_or_create_account("joe").unwrap();
        assert!(!store.is_empty().unwrap());
    }

    #[test]
    fn concurrent_mapping_replaces_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gangway.db");

        let setup = SqliteStore::open(&path).unwrap();
        setup.migrate().unwrap();
        setup
            .replace_repositories(&[
                RepositoryEntry::new("repo1", true),
                RepositoryEntry::new("repo2", true),
            ])
            .unwrap();
        drop(setup);

        // Each writer replaces the whole mapping with its own edge set, from
        // its own connection, so the writers really contend on the file.
        let first: Vec<(String, Vec<String>)> = (0..8)
            .map(|i| (format!("writer1-{i}"), vec!["repo1".to_string()]))
            .collect();
        let second: Vec<(String, Vec<String>)> = (0..8)
            .map(|i| (format!("writer2-{i}"), vec!["repo2".to_string()]))
            .collect();

        std::thread::scope(|scope| {
            for mapping in [&first, &second] {
                let path = &path;
                scope.spawn(move || {
                    let store = SqliteStore::open(path).unwrap();
                    for _ in 0..5 {
                        store.replace_account_mapping(mapping).unwrap();
                    }
                });
            }
        });

        let expected = |mapping: &[(String, Vec<String>)], repo: &str| {
            let mut edges: Vec<(String, String)> = mapping
                .iter()
                .map(|(account, _)| (account.clone(), repo.to_string()))
                .collect();
            edges.sort();
            edges
        };

        // Whichever replace committed last, the surviving edges are exactly
        // one writer's input set.
        let survivor = SqliteStore::open(&path).unwrap();
        let mut edges = survivor.export_snapshot().unwrap().account_edges;
        edges.sort();
        assert!(
            edges == expected(&first, "repo1") || edges == expected(&second, "repo2"),
            "edges mix both writers: {edges:?}"
        );
    }
}
