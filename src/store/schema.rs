/// One schema revision, applied at most once per database and tracked in the
/// `schema_migrations` table by version number.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sqlite: &'static str,
    pub postgres: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core_tables",
        sqlite: r#"
CREATE TABLE repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    auth_required INTEGER NOT NULL
);

CREATE TABLE accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE accounts_repositories (
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    PRIMARY KEY (account_id, repository_id)
);

CREATE INDEX idx_accounts_repositories_repo ON accounts_repositories(repository_id);
"#,
        postgres: r#"
CREATE TABLE repositories (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    auth_required BOOLEAN NOT NULL
);

CREATE TABLE accounts (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE accounts_repositories (
    account_id BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    repository_id BIGINT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    PRIMARY KEY (account_id, repository_id)
);

CREATE INDEX idx_accounts_repositories_repo ON accounts_repositories(repository_id);
"#,
    },
    Migration {
        version: 2,
        name: "authentication_tokens",
        sqlite: r#"
CREATE TABLE authentication_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    token_checksum TEXT NOT NULL UNIQUE,
    expire_at TEXT NOT NULL
);

CREATE INDEX idx_authentication_tokens_account ON authentication_tokens(account_id);
"#,
        postgres: r#"
CREATE TABLE authentication_tokens (
    id BIGSERIAL PRIMARY KEY,
    account_id BIGINT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    token_checksum TEXT NOT NULL UNIQUE,
    expire_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX idx_authentication_tokens_account ON authentication_tokens(account_id);
"#,
    },
    Migration {
        version: 3,
        name: "nodes",
        sqlite: r#"
CREATE TABLE nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE
);

CREATE TABLE nodes_repositories (
    node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    PRIMARY KEY (node_id, repository_id)
);

CREATE INDEX idx_nodes_repositories_repo ON nodes_repositories(repository_id);
"#,
        postgres: r#"
CREATE TABLE nodes (
    id BIGSERIAL PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE
);

CREATE TABLE nodes_repositories (
    node_id BIGINT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    repository_id BIGINT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    PRIMARY KEY (node_id, repository_id)
);

CREATE INDEX idx_nodes_repositories_repo ON nodes_repositories(repository_id);
"#,
    },
];

pub const CREATE_SCHEMA_MIGRATIONS_SQLITE: &str =
    "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY)";

pub const CREATE_SCHEMA_MIGRATIONS_POSTGRES: &str =
    "CREATE TABLE IF NOT EXISTS schema_migrations (version BIGINT PRIMARY KEY)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_and_dense() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i as i64 + 1, "migration {} out of order", m.name);
        }
    }
}
