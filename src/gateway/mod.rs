mod authz;
mod catalog;
mod sync;

pub use catalog::DEFAULT_SEARCH_LIMIT;
pub use sync::{
    auth_required_flag, mapping_entries, node_uuids, repository_entries, repository_names,
};

use std::sync::Arc;

use crate::error::Result;
use crate::store::Store;
use crate::types::Node;

/// The authorization, catalog and bulk-mutation engine. Holds no state of
/// its own beyond the store handle; every decision is a fresh query.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn Store>,
}

impl Gateway {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn account_names(&self) -> Result<Vec<String>> {
        self.store.account_names()
    }

    pub fn node(&self, uuid: &str) -> Result<Option<Node>> {
        self.store.node(uuid)
    }

    pub fn find_or_create_node(&self, uuid: &str) -> Result<Node> {
        self.store.find_or_create_node(uuid)
    }
}
