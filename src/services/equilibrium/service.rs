use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::EncodingError;
use crate::domain::{AccountId, AssetId, ChainModel, KeyParam, StoragePath};
use crate::services::assets_updating::ChainAssetsSubscriber;
use crate::services::equilibrium::handler::EquilibriumSubscriptionHandler;
use crate::services::equilibrium::updaters::{EquilibriumBalanceUpdater, EquilibriumLocksUpdater};
use crate::services::errors::RemoteSubscriptionError;
use crate::services::router::{HandlerKind, SubscriptionRouter};
use crate::services::storage_keys::SubscriptionRequest;
use crate::services::subscription_manager::{
    AttachCallback, RemoteSubscriptionService, SubscriptionHandle,
};
use crate::services::updaters::{AssetBalanceStore, AssetLocksStore, ChainStorageCache};

/// Subscribes Equilibrium balance storage: account balances, the account locks and one reserved
/// value per watched asset, all multiplexed into one subscription per chain and account.
pub struct EquilibriumSubscriptionService {
    remote_subscriptions: Arc<RemoteSubscriptionService>,
    balances: Arc<AssetBalanceStore>,
    locks: Arc<AssetLocksStore>,
    storage_cache: Arc<ChainStorageCache>,
}

impl EquilibriumSubscriptionService {
    pub fn new(
        remote_subscriptions: Arc<RemoteSubscriptionService>,
        balances: Arc<AssetBalanceStore>,
        locks: Arc<AssetLocksStore>,
        storage_cache: Arc<ChainStorageCache>,
    ) -> Self {
        Self {
            remote_subscriptions,
            balances,
            locks,
            storage_cache,
        }
    }

    pub fn balances(&self) -> &Arc<AssetBalanceStore> {
        &self.balances
    }

    pub fn locks(&self) -> &Arc<AssetLocksStore> {
        &self.locks
    }

    fn build_handler(
        &self,
        chain: &ChainModel,
        account_id: &AccountId,
        asset_ids: &BTreeSet<AssetId>,
    ) -> Result<(Vec<SubscriptionRequest>, EquilibriumSubscriptionHandler), EncodingError> {
        let chain_id = &chain.chain_id;
        let account = KeyParam::Account(account_id.clone());

        let assets_mapping: BTreeMap<_, _> = chain
            .equilibrium_assets()
            .filter(|asset| asset_ids.contains(&asset.asset_id))
            .filter_map(|asset| Some((asset.equilibrium_asset_id()?, asset.asset_id)))
            .collect();

        let balances_request =
            SubscriptionRequest::map(StoragePath::EQUILIBRIUM_BALANCES, chain_id, account.clone())?;

        let mut router = SubscriptionRouter::new()
            .with_route(balances_request.local_key().clone(), HandlerKind::AccountBalances);
        let mut requests = vec![balances_request];

        let utility_chain_asset_id = chain.utility_chain_asset_id();

        if utility_chain_asset_id.is_some() {
            let locks_request =
                SubscriptionRequest::map(StoragePath::EQUILIBRIUM_LOCKS, chain_id, account.clone())?;
            router = router.with_route(locks_request.local_key().clone(), HandlerKind::Locks);
            requests.push(locks_request);
        }

        let mut reserved_keys = Vec::with_capacity(assets_mapping.len());

        for eq_asset_id in assets_mapping.keys() {
            let reserved_request = SubscriptionRequest::double_map(
                StoragePath::EQUILIBRIUM_RESERVED,
                chain_id,
                account.clone(),
                KeyParam::U64(*eq_asset_id),
            )?;
            reserved_keys.push((reserved_request.local_key().clone(), *eq_asset_id));
            requests.push(reserved_request);
        }

        let router = router.with_reserved_keys(reserved_keys);

        let balance_updater = EquilibriumBalanceUpdater::new(
            chain_id.clone(),
            account_id.clone(),
            chain.utility_asset().map(|asset| asset.asset_id),
            assets_mapping,
            Arc::clone(&self.balances),
        );

        let locks_updater = utility_chain_asset_id.map(|chain_asset_id| {
            EquilibriumLocksUpdater::new(chain_asset_id, account_id.clone(), Arc::clone(&self.locks))
        });

        let handler = EquilibriumSubscriptionHandler::new(
            router,
            balance_updater,
            locks_updater,
            Arc::clone(&self.storage_cache),
        );

        Ok((requests, handler))
    }
}

#[async_trait]
impl ChainAssetsSubscriber for EquilibriumSubscriptionService {
    fn supported_asset_ids(&self, chain: &ChainModel) -> BTreeSet<AssetId> {
        chain
            .equilibrium_assets()
            .filter(|asset| asset.enabled)
            .map(|asset| asset.asset_id)
            .collect()
    }

    async fn attach(
        &self,
        chain: &ChainModel,
        account_id: &AccountId,
        asset_ids: &BTreeSet<AssetId>,
        callback: AttachCallback,
    ) -> Option<SubscriptionHandle> {
        let (requests, handler) = match self.build_handler(chain, account_id, asset_ids) {
            Ok(built) => built,
            Err(err) => {
                tracing::warn!(
                    chain_id = %chain.chain_id,
                    account_id = %account_id,
                    error = %err,
                    "unable to build equilibrium storage requests"
                );
                let _ = callback.send(Err(err.into()));
                return None;
            }
        };

        self.remote_subscriptions
            .attach(&chain.chain_id, requests, Arc::new(handler), Some(callback))
            .await
    }

    async fn detach(&self, handle: &SubscriptionHandle) -> Result<(), RemoteSubscriptionError> {
        self.remote_subscriptions
            .detach(&handle.cache_key, handle.subscription_id)
            .await
    }
}
