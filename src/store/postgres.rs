use std::sync::Mutex;

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{Client, GenericClient, IsolationLevel, NoTls};

use super::schema::{CREATE_SCHEMA_MIGRATIONS_POSTGRES, MIGRATIONS};
use super::{MAX_REPLACE_ATTEMPTS, Snapshot, Store, handoff::SnapshotToken};
use crate::error::{Error, Result};
use crate::types::*;

/// Client/server backend.
pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, NoTls)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn client(&self) -> std::sync::MutexGuard<'_, Client> {
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` inside a serializable transaction, retrying serialization
    /// failures up to the replace budget, then surfacing `Error::Conflict`.
    fn replace_tx<T>(&self, f: impl Fn(&mut postgres::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut client = self.client();
        for attempt in 1..=MAX_REPLACE_ATTEMPTS {
            let mut tx = client
                .build_transaction()
                .isolation_level(IsolationLevel::Serializable)
                .start()?;

            let outcome = f(&mut tx).and_then(|v| {
                tx.commit()?;
                Ok(v)
            });

            match outcome {
                Ok(v) => return Ok(v),
                Err(Error::Postgres(e)) if is_write_conflict(&e) && attempt < MAX_REPLACE_ATTEMPTS => {
                    tracing::debug!("serialization failure on attempt {attempt}, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict(
            "bulk replace retry budget exhausted".to_string(),
        ))
    }
}

fn is_write_conflict(e: &postgres::Error) -> bool {
    e.code() == Some(&SqlState::T_R_SERIALIZATION_FAILURE)
        || e.code() == Some(&SqlState::T_R_DEADLOCK_DETECTED)
}

fn account_id(client: &mut impl GenericClient, name: &str) -> Result<Option<i64>> {
    let row = client.query_opt("SELECT id FROM accounts WHERE name = $1", &[&name])?;
    Ok(row.map(|r| r.get(0)))
}

fn ensure_account(client: &mut impl GenericClient, name: &str) -> Result<i64> {
    client.execute(
        "INSERT INTO accounts (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
        &[&name],
    )?;
    account_id(client, name)?.ok_or(Error::NotFound)
}

fn node_id(client: &mut impl GenericClient, uuid: &str) -> Result<Option<i64>> {
    let row = client.query_opt("SELECT id FROM nodes WHERE uuid = $1", &[&uuid])?;
    Ok(row.map(|r| r.get(0)))
}

fn ensure_node(client: &mut impl GenericClient, uuid: &str) -> Result<i64> {
    client.execute(
        "INSERT INTO nodes (uuid) VALUES ($1) ON CONFLICT (uuid) DO NOTHING",
        &[&uuid],
    )?;
    node_id(client, uuid)?.ok_or(Error::NotFound)
}

fn auth_repository_id(client: &mut impl GenericClient, name: &str) -> Result<Option<i64>> {
    let row = client.query_opt(
        "SELECT id FROM repositories WHERE name = $1 AND auth_required",
        &[&name],
    )?;
    Ok(row.map(|r| r.get(0)))
}

impl Store for PostgresStore {
    fn migrate(&self) -> Result<()> {
        let mut client = self.client();
        client.batch_execute(CREATE_SCHEMA_MIGRATIONS_POSTGRES)?;

        for migration in MIGRATIONS {
            let applied = client
                .query_opt(
                    "SELECT 1 FROM schema_migrations WHERE version = $1",
                    &[&migration.version],
                )?
                .is_some();
            if applied {
                continue;
            }

            let mut tx = client.transaction()?;
            tx.batch_execute(migration.postgres)?;
            tx.execute(
                "INSERT INTO schema_migrations (version) VALUES ($1)",
                &[&migration.version],
            )?;
            tx.commit()?;
            tracing::info!("applied migration {} ({})", migration.version, migration.name);
        }
        Ok(())
    }

    fn repository(&self, name: &str) -> Result<Option<Repository>> {
        let mut client = self.client();
        let row = client.query_opt(
            "SELECT id, name, auth_required FROM repositories WHERE name = $1",
            &[&name],
        )?;
        Ok(row.map(|r| Repository {
            id: r.get(0),
            name: r.get(1),
            auth_required: r.get(2),
        }))
    }

    fn replace_repositories(&self, entries: &[RepositoryEntry]) -> Result<()> {
        self.replace_tx(|tx| {
            tx.execute("DELETE FROM accounts_repositories", &[])?;
            tx.execute("DELETE FROM nodes_repositories", &[])?;
            tx.execute("DELETE FROM repositories", &[])?;

            let stmt =
                tx.prepare("INSERT INTO repositories (name, auth_required) VALUES ($1, $2)")?;
            for entry in entries {
                tx.execute(&stmt, &[&entry.name, &entry.auth_required])?;
            }
            Ok(())
        })
    }

    fn find_or_create_account(&self, name: &str) -> Result<Account> {
        let mut client = self.client();
        let id = ensure_account(&mut *client, name)?;
        Ok(Account {
            id,
            name: name.to_string(),
        })
    }

    fn account_names(&self) -> Result<Vec<String>> {
        let mut client = self.client();
        let rows = client.query("SELECT name FROM accounts ORDER BY name", &[])?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn find_or_create_node(&self, uuid: &str) -> Result<Node> {
        let mut client = self.client();
        let id = ensure_node(&mut *client, uuid)?;
        Ok(Node {
            id,
            uuid: uuid.to_string(),
        })
    }

    fn node(&self, uuid: &str) -> Result<Option<Node>> {
        let mut client = self.client();
        let row = client.query_opt("SELECT id, uuid FROM nodes WHERE uuid = $1", &[&uuid])?;
        Ok(row.map(|r| Node {
            id: r.get(0),
            uuid: r.get(1),
        }))
    }

    fn replace_nodes(&self, uuids: &[String]) -> Result<()> {
        self.replace_tx(|tx| {
            tx.execute("DELETE FROM nodes", &[])?;
            let stmt = tx.prepare("INSERT INTO nodes (uuid) VALUES ($1)")?;
            for uuid in uuids {
                tx.execute(&stmt, &[uuid])?;
            }
            Ok(())
        })
    }

    fn account_authorized(&self, account_name: &str, repository_name: &str) -> Result<bool> {
        let mut client = self.client();
        let row = client.query_opt(
            "SELECT 1 FROM accounts_repositories ar
             JOIN accounts a ON a.id = ar.account_id
             JOIN repositories r ON r.id = ar.repository_id
             WHERE a.name = $1 AND r.name = $2",
            &[&account_name, &repository_name],
        )?;
        Ok(row.is_some())
    }

    fn node_authorized(&self, node_uuid: &str, repository_name: &str) -> Result<bool> {
        self.replace_tx(|tx| {
            let row = tx.query_opt(
                "SELECT 1 FROM nodes_repositories nr
                 JOIN nodes n ON n.id = nr.node_id
                 JOIN repositories r ON r.id = nr.repository_id
                 WHERE n.uuid = $1 AND r.name = $2",
                &[&node_uuid, &repository_name],
            )?;
            Ok(row.is_some())
        })
    }

    fn catalog_anonymous(&self) -> Result<Vec<String>> {
        let mut client = self.client();
        let rows = client.query(
            "SELECT name FROM repositories WHERE NOT auth_required ORDER BY name",
            &[],
        )?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn catalog_account(&self, account_name: &str) -> Result<Vec<String>> {
        let mut client = self.client();
        let rows = client.query(
            "SELECT DISTINCT r.name FROM repositories r
             LEFT JOIN accounts_repositories ar ON ar.repository_id = r.id
             LEFT JOIN accounts a ON a.id = ar.account_id
             WHERE NOT r.auth_required OR a.name = $1
             ORDER BY r.name",
            &[&account_name],
        )?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn catalog_node(&self, node_uuid: &str) -> Result<Vec<String>> {
        let mut client = self.client();
        let rows = client.query(
            "SELECT DISTINCT r.name FROM repositories r
             LEFT JOIN nodes_repositories nr ON nr.repository_id = r.id
             LEFT JOIN nodes n ON n.id = nr.node_id
             WHERE NOT r.auth_required OR n.uuid = $1
             ORDER BY r.name",
            &[&node_uuid],
        )?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
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

            tx.execute("DELETE FROM accounts_repositories", &[])?;
            let stmt = tx.prepare(
                "INSERT INTO accounts_repositories (account_id, repository_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )?;
            for (account_id, repo_id) in edges {
                tx.execute(&stmt, &[&account_id, &repo_id])?;
            }
            Ok(())
        })
    }

    fn replace_account_repositories(&self, account_name: &str, repos: &[String]) -> Result<()> {
        self.replace_tx(|tx| {
            let account_id = ensure_account(tx, account_name)?;
            tx.execute(
                "DELETE FROM accounts_repositories WHERE account_id = $1",
                &[&account_id],
            )?;
            let stmt = tx.prepare(
                "INSERT INTO accounts_repositories (account_id, repository_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )?;
            for repo_name in repos {
                if let Some(repo_id) = auth_repository_id(tx, repo_name)? {
                    tx.execute(&stmt, &[&account_id, &repo_id])?;
                }
            }
            Ok(())
        })
    }

    fn replace_node_mapping(&self, mapping: &[(String, Vec<String>)]) -> Result<()> {
        self.replace_tx(|tx| {
            let mut edges = Vec::new();
            for (uuid, repos) in mapping {
                let Some(node_id) = node_id(tx, uuid)? else {
                    continue;
                };
                for repo_name in repos {
                    if let Some(repo_id) = auth_repository_id(tx, repo_name)? {
                        edges.push((node_id, repo_id));
                    }
                }
            }

            tx.execute("DELETE FROM nodes_repositories", &[])?;
            let stmt = tx.prepare(
                "INSERT INTO nodes_repositories (node_id, repository_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )?;
            for (node_id, repo_id) in edges {
                tx.execute(&stmt, &[&node_id, &repo_id])?;
            }
            Ok(())
        })
    }

    fn replace_node_repositories(&self, node_uuid: &str, repos: &[String]) -> Result<()> {
        self.replace_tx(|tx| {
            let node_id = ensure_node(tx, node_uuid)?;
            tx.execute(
                "DELETE FROM nodes_repositories WHERE node_id = $1",
                &[&node_id],
            )?;
            let stmt = tx.prepare(
                "INSERT INTO nodes_repositories (node_id, repository_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )?;
            for repo_name in repos {
                if let Some(repo_id) = auth_repository_id(tx, repo_name)? {
                    tx.execute(&stmt, &[&node_id, &repo_id])?;
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
        let mut client = self.client();
        let mut tx = client.transaction()?;

        let account_id = ensure_account(&mut tx, account_name)?;

        tx.execute(
            "DELETE FROM authentication_tokens WHERE token_checksum = $1",
            &[&checksum],
        )?;
        tx.execute(
            "INSERT INTO authentication_tokens (account_id, token_checksum, expire_at)
             VALUES ($1, $2, $3)",
            &[&account_id, &checksum, &expire_at],
        )?;

        if clear_expired {
            tx.execute(
                "DELETE FROM authentication_tokens WHERE expire_at < $1",
                &[&Utc::now()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn token(&self, checksum: &str) -> Result<Option<AuthenticationToken>> {
        let mut client = self.client();
        let row = client.query_opt(
            "SELECT id, account_id, token_checksum, expire_at
             FROM authentication_tokens WHERE token_checksum = $1",
            &[&checksum],
        )?;
        Ok(row.map(|r| AuthenticationToken {
            id: r.get(0),
            account_id: r.get(1),
            token_checksum: r.get(2),
            expire_at: r.get(3),
        }))
    }

    fn token_account(&self, checksum: &str) -> Result<Option<Account>> {
        let mut client = self.client();
        let row = client.query_opt(
            "SELECT a.id, a.name FROM accounts a
             JOIN authentication_tokens t ON t.account_id = a.id
             WHERE t.token_checksum = $1",
            &[&checksum],
        )?;
        Ok(row.map(|r| Account {
            id: r.get(0),
            name: r.get(1),
        }))
    }

    fn is_empty(&self) -> Result<bool> {
        let mut client = self.client();
        let row = client.query_one(
            "SELECT (SELECT COUNT(*) FROM repositories)
                  + (SELECT COUNT(*) FROM accounts)
                  + (SELECT COUNT(*) FROM nodes)
                  + (SELECT COUNT(*) FROM authentication_tokens)",
            &[],
        )?;
        let count: i64 = row.get(0);
        Ok(count == 0)
    }

    fn export_snapshot(&self) -> Result<Snapshot> {
        let mut client = self.client();

        let repositories = client
            .query(
                "SELECT name, auth_required FROM repositories ORDER BY name",
                &[],
            )?
            .iter()
            .map(|r| RepositoryEntry {
                name: r.get(0),
                auth_required: r.get(1),
            })
            .collect();

        let accounts = client
            .query("SELECT name FROM accounts ORDER BY name", &[])?
            .iter()
            .map(|r| r.get(0))
            .collect();

        let nodes = client
            .query("SELECT uuid FROM nodes ORDER BY uuid", &[])?
            .iter()
            .map(|r| r.get(0))
            .collect();

        let tokens = client
            .query(
                "SELECT a.name, t.token_checksum, t.expire_at
                 FROM authentication_tokens t JOIN accounts a ON a.id = t.account_id",
                &[],
            )?
            .iter()
            .map(|r| SnapshotToken {
                account: r.get(0),
                checksum: r.get(1),
                expire_at: r.get(2),
            })
            .collect();

        let account_edges = client
            .query(
                "SELECT a.name, r.name FROM accounts_repositories ar
                 JOIN accounts a ON a.id = ar.account_id
                 JOIN repositories r ON r.id = ar.repository_id",
                &[],
            )?
            .iter()
            .map(|r| (r.get(0), r.get(1)))
            .collect();

        let node_edges = client
            .query(
                "SELECT n.uuid, r.name FROM nodes_repositories nr
                 JOIN nodes n ON n.id = nr.node_id
                 JOIN repositories r ON r.id = nr.repository_id",
                &[],
            )?
            .iter()
            .map(|r| (r.get(0), r.get(1)))
            .collect();

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
        let mut client = self.client();
        let mut tx = client.transaction()?;

        for entry in &snapshot.repositories {
            tx.execute(
                "INSERT INTO repositories (name, auth_required) VALUES ($1, $2)",
                &[&entry.name, &entry.auth_required],
            )?;
        }
        for name in &snapshot.accounts {
            ensure_account(&mut tx, name)?;
        }
        for uuid in &snapshot.nodes {
            ensure_node(&mut tx, uuid)?;
        }
        for token in &snapshot.tokens {
            let account_id = ensure_account(&mut tx, &token.account)?;
            tx.execute(
                "INSERT INTO authentication_tokens (account_id, token_checksum, expire_at)
                 VALUES ($1, $2, $3)",
                &[&account_id, &token.checksum, &token.expire_at],
            )?;
        }
        for (account, repo) in &snapshot.account_edges {
            tx.execute(
                "INSERT INTO accounts_repositories (account_id, repository_id)
                 SELECT a.id, r.id FROM accounts a, repositories r
                 WHERE a.name = $1 AND r.name = $2
                 ON CONFLICT DO NOTHING",
                &[&account, &repo],
            )?;
        }
        for (uuid, repo) in &snapshot.node_edges {
            tx.execute(
                "INSERT INTO nodes_repositories (node_id, repository_id)
                 SELECT n.id, r.id FROM nodes n, repositories r
                 WHERE n.uuid = $1 AND r.name = $2
                 ON CONFLICT DO NOTHING",
                &[&uuid, &repo],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
