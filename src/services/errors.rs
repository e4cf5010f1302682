use thiserror::Error;

use crate::domain::errors::EncodingError;
use crate::domain::{ChainId, LocalStorageKey, StoragePath};
use crate::infra::ChainRegistryError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteSubscriptionError {
    #[error("Unable to construct storage key: {0}")]
    KeyConstruction(#[from] EncodingError),

    #[error(transparent)]
    ChainRegistry(#[from] ChainRegistryError),

    #[error("None of the requested storage paths exist in runtime of chain {0}")]
    NoStorageKeys(ChainId),

    #[error("Subscription was detached before it became active")]
    Cancelled,

    #[error("Detach with stale subscription id")]
    StaleDetach,

    #[error("Expected to remove subscription but not found for chain {0}")]
    MissingActiveSubscription(ChainId),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unable to decode {0} value for key {1}: {2}")]
    InvalidValue(StoragePath, LocalStorageKey, String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Unable to persist balance change: {0}")]
    WriteFailed(String),
}
