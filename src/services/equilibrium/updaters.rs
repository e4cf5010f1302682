use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy::primitives::U256;
use tokio::sync::Mutex;

use crate::domain::{
    AccountId, AssetId, BalanceSnapshot, BlockHash, ChainAssetId, ChainId, EquilibriumAssetId,
};
use crate::services::equilibrium::codec::EquilibriumAccountInfo;
use crate::services::updaters::{AssetBalanceStore, AssetLocksStore};

#[derive(Default)]
struct ReceivedState {
    account_info: Option<EquilibriumAccountInfo>,
    reserved: HashMap<EquilibriumAssetId, U256>,
}

/// Combines `System.Account` and per-asset `EqBalances.Reserved` values of one account
/// into asset balances. An asset is emitted once both its reserved value and the account
/// balances have been received.
pub struct EquilibriumBalanceUpdater {
    chain_id: ChainId,
    account_id: AccountId,
    utility_asset_id: Option<AssetId>,
    assets_mapping: BTreeMap<EquilibriumAssetId, AssetId>,
    store: Arc<AssetBalanceStore>,
    state: Mutex<ReceivedState>,
}

impl EquilibriumBalanceUpdater {
    pub fn new(
        chain_id: ChainId,
        account_id: AccountId,
        utility_asset_id: Option<AssetId>,
        assets_mapping: BTreeMap<EquilibriumAssetId, AssetId>,
        store: Arc<AssetBalanceStore>,
    ) -> Self {
        Self {
            chain_id,
            account_id,
            utility_asset_id,
            assets_mapping,
            store,
            state: Mutex::new(ReceivedState::default()),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// `None` value means the account has no entry on chain
    pub async fn handle_account_balances(
        &self,
        info: Option<EquilibriumAccountInfo>,
        block: Option<BlockHash>,
    ) -> bool {
        let mut state = self.state.lock().await;
        state.account_info = Some(info.unwrap_or_default());

        self.check_changes(&state, block).await
    }

    pub async fn handle_reserved_balance(
        &self,
        asset_id: EquilibriumAssetId,
        reserved: Option<U256>,
        block: Option<BlockHash>,
    ) -> bool {
        let mut state = self.state.lock().await;
        state.reserved.insert(asset_id, reserved.unwrap_or_default());

        self.check_changes(&state, block).await
    }

    async fn check_changes(&self, state: &ReceivedState, block: Option<BlockHash>) -> bool {
        let Some(account_info) = state.account_info.as_ref() else {
            return false;
        };

        if state.reserved.is_empty() {
            return false;
        }

        let mut remote: HashMap<AssetId, BalanceSnapshot> = HashMap::new();

        for (eq_asset_id, balance) in &account_info.balances {
            let Some(reserved) = state.reserved.get(eq_asset_id) else {
                continue;
            };

            let Some(asset_id) = self.assets_mapping.get(eq_asset_id) else {
                continue;
            };

            let frozen = if Some(*asset_id) == self.utility_asset_id {
                account_info.lock
            } else {
                U256::ZERO
            };

            remote.insert(
                *asset_id,
                BalanceSnapshot {
                    free: balance.free(),
                    reserved: *reserved,
                    frozen,
                },
            );
        }

        let mut changed = false;

        for (asset_id, snapshot) in &remote {
            let chain_asset_id = ChainAssetId::new(self.chain_id.clone(), *asset_id);
            changed |= self
                .store
                .apply(&self.account_id, &chain_asset_id, *snapshot, block)
                .await;
        }

        // stored records of assets that are no longer watched are reconciled too
        let stored = self.store.asset_ids(&self.chain_id, &self.account_id).await;

        for asset_id in stored.into_iter().filter(|asset_id| !remote.contains_key(asset_id)) {
            let chain_asset_id = ChainAssetId::new(self.chain_id.clone(), asset_id);
            changed |= self.store.remove(&self.account_id, &chain_asset_id, block).await;
        }

        if changed {
            tracing::debug!(chain_id = %self.chain_id, account_id = %self.account_id, "equilibrium balances changed");
        }

        changed
    }
}

/// Applies `EqBalances.Locked` to the chain utility asset
pub struct EquilibriumLocksUpdater {
    chain_asset_id: ChainAssetId,
    account_id: AccountId,
    store: Arc<AssetLocksStore>,
}

impl EquilibriumLocksUpdater {
    pub fn new(chain_asset_id: ChainAssetId, account_id: AccountId, store: Arc<AssetLocksStore>) -> Self {
        Self {
            chain_asset_id,
            account_id,
            store,
        }
    }

    pub async fn handle_locks(&self, locks: Vec<(Vec<u8>, U256)>, block: Option<BlockHash>) -> bool {
        self.store
            .apply(&self.account_id, &self.chain_asset_id, locks, block)
            .await
    }
}
