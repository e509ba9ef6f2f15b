use serde_json::Value;

use super::Gateway;
use crate::error::{Error, Result};
use crate::types::RepositoryEntry;

/// Coerces a repository's `auth_required` field. The identity provider sends
/// the flag as a bool or as the string form of one.
pub fn auth_required_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Parses a repository-list payload: an array of `{repository, auth_required}`
/// objects.
pub fn repository_entries(repositories: &Value) -> Result<Vec<RepositoryEntry>> {
    let Some(items) = repositories.as_array() else {
        return Err(Error::InvalidInput(
            "repositories must be an array".to_string(),
        ));
    };
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item.get("repository").and_then(Value::as_str) else {
            return Err(Error::InvalidInput(
                "repository entry is missing a name".to_string(),
            ));
        };
        entries.push(RepositoryEntry::new(
            name,
            auth_required_flag(item.get("auth_required")),
        ));
    }
    Ok(entries)
}

/// Parses a full-mapping payload. `key` is the top-level list name ("users"
/// or "hosts"); each element maps one identity to its repository entries.
/// Blank identity keys are skipped. Only repositories flagged auth-required
/// survive into the edge set; the rest are universally visible anyway.
pub fn mapping_entries(payload: &Value, key: &str) -> Result<Vec<(String, Vec<String>)>> {
    let Some(items) = payload.get(key).and_then(Value::as_array) else {
        return Err(Error::InvalidInput(format!("{key} must be an array")));
    };
    let mut mapping = Vec::new();
    for item in items {
        let Some(object) = item.as_object() else {
            return Err(Error::InvalidInput(format!("{key} entries must be objects")));
        };
        for (identity, repos) in object {
            if identity.trim().is_empty() {
                continue;
            }
            mapping.push((identity.clone(), repository_names(repos)));
        }
    }
    Ok(mapping)
}

/// Repository names requiring auth from a list of `{repository,
/// auth_required}` objects or plain name strings. Used for both mapping
/// payloads and the identity provider's per-identity repository lists.
pub fn repository_names(repos: &Value) -> Vec<String> {
    let Some(items) = repos.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name.clone()),
            Value::Object(map) => {
                if auth_required_flag(map.get("auth_required")) {
                    map.get("repository")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                } else {
                    None
                }
            }
            _ => None,
        })
        .collect()
}

/// Node uuids from an `update_hosts` payload: an array of `{uuid}` objects.
/// Entries without a usable uuid are skipped.
pub fn node_uuids(payload: &Value) -> Vec<String> {
    payload
        .get("hosts")
        .and_then(Value::as_array)
        .map(|hosts| {
            hosts
                .iter()
                .filter_map(|host| host.get("uuid").and_then(Value::as_str))
                .filter(|uuid| !uuid.trim().is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Gateway {
    /// Replaces the whole repository table. Mapping edges referencing the
    /// old rows go with them.
    pub fn replace_repository_list(&self, entries: &[RepositoryEntry]) -> Result<()> {
        self.store.replace_repositories(entries)
    }

    /// Rewrites every account-to-repository edge from a full mapping.
    pub fn replace_account_mapping(&self, mapping: &[(String, Vec<String>)]) -> Result<()> {
        self.store.replace_account_mapping(mapping)
    }

    /// Rewrites a single account's edges, leaving other accounts untouched.
    pub fn replace_account_repositories(&self, account: &str, repos: &[String]) -> Result<()> {
        self.store.replace_account_repositories(account, repos)
    }

    /// Rewrites every node-to-repository edge. Unknown node uuids in the
    /// mapping are skipped, not an error.
    pub fn replace_node_mapping(&self, mapping: &[(String, Vec<String>)]) -> Result<()> {
        self.store.replace_node_mapping(mapping)
    }

    /// Rewrites a single node's edges.
    pub fn replace_node_repositories(&self, uuid: &str, repos: &[String]) -> Result<()> {
        self.store.replace_node_repositories(uuid, repos)
    }

    /// Replaces the node roster itself.
    pub fn replace_nodes(&self, uuids: &[String]) -> Result<()> {
        self.store.replace_nodes(uuids)
    }
}
