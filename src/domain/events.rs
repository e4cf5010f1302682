use crate::domain::{AccountId, AssetBalance, AssetLock, BlockHash, ChainAssetId};

/// Events published by the updaters after a record effectively changed
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceEvent {
    /// Balance record inserted or updated
    AssetBalanceChanged {
        balance: AssetBalance,
        block: Option<BlockHash>,
    },
    /// Balance record removed because the chain no longer reports it
    AssetBalanceRemoved {
        chain_asset_id: ChainAssetId,
        account_id: AccountId,
        block: Option<BlockHash>,
    },
    /// Full replacement of the lock set
    AssetLocksChanged {
        chain_asset_id: ChainAssetId,
        account_id: AccountId,
        locks: Vec<AssetLock>,
        block: Option<BlockHash>,
    },
}

impl BalanceEvent {
    pub fn chain_asset_id(&self) -> &ChainAssetId {
        match self {
            BalanceEvent::AssetBalanceChanged { balance, .. } => &balance.chain_asset_id,
            BalanceEvent::AssetBalanceRemoved { chain_asset_id, .. }
            | BalanceEvent::AssetLocksChanged { chain_asset_id, .. } => chain_asset_id,
        }
    }
}
