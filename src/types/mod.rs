mod identity;
mod models;

pub use identity::Identity;
pub use models::{Account, AuthenticationToken, Node, Repository, RepositoryEntry};
