use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use parity_scale_codec::Encode;

use crate::config::constants::VALID_ACCOUNT_ID_LENGTHS;
use crate::domain::errors::EncodingError;
use crate::domain::{ChainId, KeyParam, LocalStorageKey, RemoteStorageKey, StoragePath};
use crate::infra::RuntimeCoder;

fn validate_param(param: &KeyParam) -> Result<(), EncodingError> {
    match param {
        KeyParam::Account(account_id) if !VALID_ACCOUNT_ID_LENGTHS.contains(&account_id.len()) => Err(
            EncodingError::InvalidAccountIdLength(account_id.len(), VALID_ACCOUNT_ID_LENGTHS),
        ),
        _ => Ok(()),
    }
}

/// Builds the local key of a remote storage item.
///
/// The key is the hex of the SCALE encoding of `(chain id, module, item, params)`. Every
/// component is length prefixed or tagged, so different items never produce the same key.
pub fn create_local_key(
    path: &StoragePath,
    chain_id: &ChainId,
    params: &[KeyParam],
) -> Result<LocalStorageKey, EncodingError> {
    params.iter().try_for_each(validate_param)?;

    let mut encoded = Vec::new();
    chain_id.as_str().encode_to(&mut encoded);
    path.module.encode_to(&mut encoded);
    path.item.encode_to(&mut encoded);
    params.encode_to(&mut encoded);

    Ok(LocalStorageKey::from_encoded(&encoded))
}

/// One remote storage item to watch. Key parameters are plain values, encoded into the
/// remote key only when the registry opens the wire subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionRequest {
    Map {
        storage_path: StoragePath,
        local_key: LocalStorageKey,
        key: KeyParam,
    },
    DoubleMap {
        storage_path: StoragePath,
        local_key: LocalStorageKey,
        key1: KeyParam,
        key2: KeyParam,
    },
}

impl SubscriptionRequest {
    pub fn map(
        storage_path: StoragePath,
        chain_id: &ChainId,
        key: KeyParam,
    ) -> Result<Self, EncodingError> {
        let local_key = create_local_key(&storage_path, chain_id, std::slice::from_ref(&key))?;

        Ok(SubscriptionRequest::Map {
            storage_path,
            local_key,
            key,
        })
    }

    pub fn double_map(
        storage_path: StoragePath,
        chain_id: &ChainId,
        key1: KeyParam,
        key2: KeyParam,
    ) -> Result<Self, EncodingError> {
        let local_key = create_local_key(&storage_path, chain_id, &[key1.clone(), key2.clone()])?;

        Ok(SubscriptionRequest::DoubleMap {
            storage_path,
            local_key,
            key1,
            key2,
        })
    }

    pub fn storage_path(&self) -> &StoragePath {
        match self {
            SubscriptionRequest::Map { storage_path, .. }
            | SubscriptionRequest::DoubleMap { storage_path, .. } => storage_path,
        }
    }

    pub fn local_key(&self) -> &LocalStorageKey {
        match self {
            SubscriptionRequest::Map { local_key, .. }
            | SubscriptionRequest::DoubleMap { local_key, .. } => local_key,
        }
    }

    pub fn params(&self) -> Vec<KeyParam> {
        match self {
            SubscriptionRequest::Map { key, .. } => vec![key.clone()],
            SubscriptionRequest::DoubleMap { key1, key2, .. } => vec![key1.clone(), key2.clone()],
        }
    }

    pub fn remote_key(&self, coder: &dyn RuntimeCoder) -> Result<RemoteStorageKey, EncodingError> {
        coder.storage_key(self.storage_path(), &self.params())
    }
}

/// Identity of one logical subscription: the chain plus the sorted set of watched items
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    chain_id: ChainId,
    items: BTreeSet<(StoragePath, Vec<KeyParam>)>,
}

impl CacheKey {
    pub fn from_requests(chain_id: &ChainId, requests: &[SubscriptionRequest]) -> Self {
        Self {
            chain_id: chain_id.clone(),
            items: requests
                .iter()
                .map(|request| (*request.storage_path(), request.params()))
                .collect(),
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{} items]", self.chain_id, self.items.len())
    }
}
