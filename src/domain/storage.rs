use crate::domain::AccountId;
use alloy::primitives::{hex, Bytes};
use parity_scale_codec::{Encode, Output};
use std::fmt::{Display, Formatter};

/// Remote storage item identity (pallet + item name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoragePath {
    pub module: &'static str,
    pub item: &'static str,
}

impl StoragePath {
    pub const fn new(module: &'static str, item: &'static str) -> Self {
        Self { module, item }
    }

    pub const EQUILIBRIUM_BALANCES: StoragePath = StoragePath::new("System", "Account");
    pub const EQUILIBRIUM_LOCKS: StoragePath = StoragePath::new("EqBalances", "Locked");
    pub const EQUILIBRIUM_RESERVED: StoragePath = StoragePath::new("EqBalances", "Reserved");
}

impl Display for StoragePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.item)
    }
}

/// Encodable parameter of a storage map key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Encode)]
pub enum KeyParam {
    Account(AccountId),
    U64(u64),
    U32(u32),
    Bytes(Vec<u8>),
}

impl Encode for AccountId {
    fn encode_to<T: Output + ?Sized>(&self, dest: &mut T) {
        self.as_bytes().encode_to(dest)
    }
}

/// Deterministic local identifier of one remote storage item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalStorageKey(String);

impl LocalStorageKey {
    pub(crate) fn from_encoded(encoded: &[u8]) -> Self {
        Self(hex::encode_prefixed(encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LocalStorageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage key as the node understands it, produced by the runtime coder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteStorageKey(pub Bytes);

impl RemoteStorageKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }
}

impl Display for RemoteStorageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
