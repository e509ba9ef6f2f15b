use super::Gateway;
use crate::error::Result;
use crate::types::Identity;

/// Result cap for v1 search when the caller gives none.
pub const DEFAULT_SEARCH_LIMIT: i64 = 25;

impl Gateway {
    /// Repository names visible to `identity`, deduplicated, name-ascending.
    /// Sentinel and anonymous identities see only the public set.
    pub fn catalog(&self, identity: &Identity) -> Result<Vec<String>> {
        match identity {
            Identity::Account(name) => self.store.catalog_account(name),
            Identity::Node(uuid) => self.store.catalog_node(uuid),
            _ => self.store.catalog_anonymous(),
        }
    }

    /// Case-sensitive substring search over the identity's catalog. An
    /// absent or empty query matches everything; a non-positive limit
    /// yields nothing.
    pub fn search(
        &self,
        identity: &Identity,
        query: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<String>> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let query = query.unwrap_or("");
        Ok(self
            .catalog(identity)?
            .into_iter()
            .filter(|name| name.contains(query))
            .take(limit as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store};
    use crate::types::RepositoryEntry;
    use std::sync::Arc;

    fn gateway() -> Gateway {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().unwrap();
        Gateway::new(Arc::new(store))
    }

    fn account(name: &str) -> Identity {
        Identity::Account(name.to_string())
    }

    #[test]
    fn anonymous_catalog_is_public_repositories_only() {
        let gw = gateway();
        gw.replace_repository_list(&[
            RepositoryEntry::new("zeta", false),
            RepositoryEntry::new("alpha", false),
            RepositoryEntry::new("private", true),
        ])
        .unwrap();
        assert_eq!(gw.catalog(&Identity::Anonymous).unwrap(), ["alpha", "zeta"]);
        assert_eq!(
            gw.catalog(&Identity::UnauthenticatedToken).unwrap(),
            ["alpha", "zeta"]
        );
    }

    #[test]
    fn account_catalog_is_sorted_union_of_public_and_mapped() {
        let gw = gateway();
        gw.replace_repository_list(&[
            RepositoryEntry::new("repo1", false),
            RepositoryEntry::new("repo2", true),
            RepositoryEntry::new("repo3", true),
        ])
        .unwrap();
        gw.replace_account_repositories("foreman", &["repo2".to_string()])
            .unwrap();
        assert_eq!(gw.catalog(&account("foreman")).unwrap(), ["repo1", "repo2"]);
    }

    #[test]
    fn catalog_is_idempotent_between_mutations() {
        let gw = gateway();
        gw.replace_repository_list(&[
            RepositoryEntry::new("b", false),
            RepositoryEntry::new("a", false),
        ])
        .unwrap();
        let first = gw.catalog(&Identity::Anonymous).unwrap();
        let second = gw.catalog(&Identity::Anonymous).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn search_filters_by_substring_in_catalog_order() {
        let gw = gateway();
        gw.replace_repository_list(&[
            RepositoryEntry::new("alpha", false),
            RepositoryEntry::new("beta", false),
            RepositoryEntry::new("alphabet", false),
        ])
        .unwrap();
        assert_eq!(
            gw.search(&Identity::Anonymous, Some("alpha"), None).unwrap(),
            ["alpha", "alphabet"]
        );
    }

    #[test]
    fn search_without_query_truncates_to_limit() {
        let gw = gateway();
        gw.replace_repository_list(&[
            RepositoryEntry::new("alpha", false),
            RepositoryEntry::new("beta", false),
            RepositoryEntry::new("alphabet", false),
        ])
        .unwrap();
        assert_eq!(
            gw.search(&Identity::Anonymous, None, Some(1)).unwrap(),
            ["alpha"]
        );
    }

    #[test]
    fn non_positive_limit_yields_nothing() {
        let gw = gateway();
        gw.replace_repository_list(&[RepositoryEntry::new("alpha", false)])
            .unwrap();
        assert!(
            gw.search(&Identity::Anonymous, None, Some(0))
                .unwrap()
                .is_empty()
        );
        assert!(
            gw.search(&Identity::Anonymous, None, Some(-3))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn search_is_case_sensitive() {
        let gw = gateway();
        gw.replace_repository_list(&[RepositoryEntry::new("Alpha", false)])
            .unwrap();
        assert!(
            gw.search(&Identity::Anonymous, Some("alpha"), None)
                .unwrap()
                .is_empty()
        );
    }
}
