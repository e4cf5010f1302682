use crate::domain::{AccountId, ChainAssetId};
use alloy::primitives::U256;

/// Authoritative balance snapshot of one (chain asset, account) pair. Amounts are in plank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBalance {
    pub chain_asset_id: ChainAssetId,
    pub account_id: AccountId,
    pub free: U256,
    pub reserved: U256,
    pub frozen: U256,
}

/// Decoded free/reserved/frozen triple forwarded by handlers to the balance updater
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceSnapshot {
    pub free: U256,
    pub reserved: U256,
    pub frozen: U256,
}

/// One lock slot; `lock_type` is the opaque on-chain identifier and the slot identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLock {
    pub chain_asset_id: ChainAssetId,
    pub account_id: AccountId,
    pub lock_type: Vec<u8>,
    pub amount: U256,
}
