use alloy::primitives::{hex, B256};
use std::fmt::{Display, Formatter};

/// Chain identifier as published by the chain registry (genesis hash hex for substrate chains)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Chain-local asset model id (index of the asset in the chain's asset list)
pub type AssetId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainAssetId {
    pub chain_id: ChainId,
    pub asset_id: AssetId,
}

impl ChainAssetId {
    pub fn new(chain_id: ChainId, asset_id: AssetId) -> Self {
        Self { chain_id, asset_id }
    }
}

impl Display for ChainAssetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.asset_id)
    }
}

/// Raw account id bytes. Length is validated when the id is encoded into a storage key,
/// so a malformed id is representable but never subscribable.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(Vec<u8>);

impl AccountId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode_prefixed(&self.0))
    }
}

impl std::fmt::Debug for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccountId({self})")
    }
}

impl From<[u8; 32]> for AccountId {
    fn from(value: [u8; 32]) -> Self {
        Self(value.to_vec())
    }
}

pub type BlockHash = B256;
