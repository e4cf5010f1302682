//! Routing of local storage keys to the handler that decodes them.

use std::collections::HashMap;

use crate::domain::{EquilibriumAssetId, LocalStorageKey};

/// Decode-and-forward strategy of one local key inside a multiplexed subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    AccountBalances,
    Locks,
    Reserved(EquilibriumAssetId),
    /// Fallback for keys the router was not built with
    Unknown,
}

/// Maps local keys back to handler kinds. Built once per attach.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRouter {
    routes: HashMap<LocalStorageKey, HandlerKind>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, key: LocalStorageKey, kind: HandlerKind) -> Self {
        self.routes.insert(key, kind);
        self
    }

    pub fn with_reserved_keys(
        mut self,
        reserved_keys: impl IntoIterator<Item = (LocalStorageKey, EquilibriumAssetId)>,
    ) -> Self {
        self.routes.extend(
            reserved_keys
                .into_iter()
                .map(|(key, asset_id)| (key, HandlerKind::Reserved(asset_id))),
        );
        self
    }

    pub fn create_handler(&self, key: &LocalStorageKey) -> HandlerKind {
        match self.routes.get(key) {
            Some(kind) => *kind,
            None => {
                tracing::warn!(%key, "no handler for local storage key, falling back to default");
                HandlerKind::Unknown
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
