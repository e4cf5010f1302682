//! Boundary with the collaborators the engine does not own: chain registry, node
//! connections and runtime metadata coders.

use std::sync::Arc;

use alloy::primitives::Bytes;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::errors::EncodingError;
use crate::domain::{BlockHash, ChainChange, ChainId, ChainModel, KeyParam, RemoteStorageKey, StoragePath};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainRegistryError {
    #[error("Connection is unavailable for chain {0}")]
    ConnectionUnavailable(ChainId),

    #[error("Runtime metadata is unavailable for chain {0}")]
    RuntimeMetadataUnavailable(ChainId),

    #[error("Wire request failed: {0}")]
    Transport(String),
}

/// Wire-level subscription identifier assigned by the node
pub type WireSubscriptionId = String;

/// Storage changes reported by the node for one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChangeSet {
    pub block: Option<BlockHash>,
    pub changes: Vec<(RemoteStorageKey, Option<Bytes>)>,
}

pub struct WireSubscription {
    pub id: WireSubscriptionId,
    pub changes: BoxStream<'static, StorageChangeSet>,
}

/// Node connection shared by every subscription of a chain; the engine never closes it.
#[async_trait]
pub trait StorageConnection: Send + Sync {
    async fn subscribe_storage(
        &self,
        keys: Vec<RemoteStorageKey>,
    ) -> Result<WireSubscription, ChainRegistryError>;

    async fn unsubscribe_storage(&self, id: WireSubscriptionId) -> Result<(), ChainRegistryError>;
}

/// Encodes remote storage keys according to the chain runtime metadata
pub trait RuntimeCoder: Send + Sync {
    fn storage_key(
        &self,
        path: &StoragePath,
        params: &[KeyParam],
    ) -> Result<RemoteStorageKey, EncodingError>;
}

#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// Whether a metadata snapshot is already loaded
    fn has_snapshot(&self) -> bool;

    async fn fetch_coder(&self) -> Result<Arc<dyn RuntimeCoder>, ChainRegistryError>;
}

#[derive(Debug, Clone)]
pub enum ChainRegistryEvent {
    ChainsChanged(Vec<ChainChange>),
    RuntimeReady(ChainId),
}

pub trait ChainRegistry: Send + Sync {
    fn connection(&self, chain_id: &ChainId) -> Option<Arc<dyn StorageConnection>>;

    fn runtime_provider(&self, chain_id: &ChainId) -> Option<Arc<dyn RuntimeProvider>>;

    fn chain(&self, chain_id: &ChainId) -> Option<ChainModel>;

    fn chains(&self) -> Vec<ChainModel>;

    fn subscribe_events(&self) -> broadcast::Receiver<ChainRegistryEvent>;
}
