/// The caller identity a request resolves to before any authorization check.
///
/// The two token sentinels are distinct from `Anonymous`: the upstream
/// identity provider hands them out for known-bad exchanges, and the ping
/// and catalog surfaces treat "known invalid" differently from "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Account(String),
    Node(String),
    UnauthorizedToken,
    UnauthenticatedToken,
}

impl Identity {
    /// The account name, when this identity is a logged-in account.
    pub fn account_name(&self) -> Option<&str> {
        match self {
            Identity::Account(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            Identity::UnauthorizedToken | Identity::UnauthenticatedToken
        )
    }
}
