use super::Gateway;
use crate::error::Result;
use crate::types::Identity;

impl Gateway {
    /// Whether `identity` may see the repository named `name`.
    ///
    /// An unknown name is a plain deny so callers cannot probe for
    /// existence. Names compare by exact equality only.
    pub fn authorized_for_repo(&self, name: &str, identity: &Identity) -> Result<bool> {
        let Some(repository) = self.store.repository(name)? else {
            return Ok(false);
        };
        if !repository.auth_required {
            return Ok(true);
        }
        match identity {
            Identity::Account(account) => self.store.account_authorized(account, name),
            Identity::Node(uuid) => self.store.node_authorized(uuid, name),
            _ => Ok(false),
        }
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
    fn public_repository_is_visible_to_everyone() {
        let gw = gateway();
        gw.replace_repository_list(&[RepositoryEntry::new("library/busybox", false)])
            .unwrap();
        for identity in [
            Identity::Anonymous,
            account("joe"),
            Identity::Node("uuid-1".to_string()),
            Identity::UnauthorizedToken,
        ] {
            assert!(
                gw.authorized_for_repo("library/busybox", &identity).unwrap(),
                "{identity:?} should see a public repository"
            );
        }
    }

    #[test]
    fn unmapped_private_repository_is_visible_to_nobody() {
        let gw = gateway();
        gw.replace_repository_list(&[RepositoryEntry::new("secret", true)])
            .unwrap();
        for identity in [
            Identity::Anonymous,
            account("joe"),
            Identity::Node("uuid-1".to_string()),
            Identity::UnauthenticatedToken,
        ] {
            assert!(!gw.authorized_for_repo("secret", &identity).unwrap());
        }
    }

    #[test]
    fn unknown_repository_denies_every_identity() {
        let gw = gateway();
        assert!(!gw.authorized_for_repo("ghost", &Identity::Anonymous).unwrap());
        assert!(!gw.authorized_for_repo("ghost", &account("joe")).unwrap());
    }

    #[test]
    fn mapped_account_sees_its_private_repository() {
        let gw = gateway();
        gw.replace_repository_list(&[
            RepositoryEntry::new("repo1", false),
            RepositoryEntry::new("repo2", true),
            RepositoryEntry::new("repo3", true),
        ])
        .unwrap();
        gw.replace_account_repositories("foreman", &["repo2".to_string()])
            .unwrap();

        assert!(gw.authorized_for_repo("repo2", &account("foreman")).unwrap());
        assert!(!gw.authorized_for_repo("repo3", &account("foreman")).unwrap());
        assert!(
            gw.authorized_for_repo("repo1", &Identity::Anonymous)
                .unwrap()
        );
    }

    #[test]
    fn mapped_node_sees_its_private_repository() {
        let gw = gateway();
        gw.replace_repository_list(&[RepositoryEntry::new("edge", true)])
            .unwrap();
        gw.find_or_create_node("uuid-1").unwrap();
        gw.replace_node_repositories("uuid-1", &["edge".to_string()])
            .unwrap();

        let node = Identity::Node("uuid-1".to_string());
        assert!(gw.authorized_for_repo("edge", &node).unwrap());
        assert!(
            !gw.authorized_for_repo("edge", &Identity::Node("uuid-2".to_string()))
                .unwrap()
        );
    }

    #[test]
    fn names_match_exactly_only() {
        let gw = gateway();
        gw.replace_repository_list(&[RepositoryEntry::new("repo", false)])
            .unwrap();
        assert!(!gw.authorized_for_repo("Repo", &Identity::Anonymous).unwrap());
        assert!(!gw.authorized_for_repo("rep", &Identity::Anonymous).unwrap());
    }
}
