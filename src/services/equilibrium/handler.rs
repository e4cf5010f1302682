use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;

use crate::domain::{BlockHash, EquilibriumAssetId, LocalStorageKey, StoragePath};
use crate::services::batch_subscription::{BatchOutcome, StorageBatch, StorageBatchHandler};
use crate::services::equilibrium::codec::{
    decode_account_info, decode_locks, decode_reserved, EquilibriumAccountInfo,
};
use crate::services::equilibrium::updaters::{EquilibriumBalanceUpdater, EquilibriumLocksUpdater};
use crate::services::errors::DecodeError;
use crate::services::router::{HandlerKind, SubscriptionRouter};
use crate::services::updaters::ChainStorageCache;

enum Decoded {
    AccountBalances(Option<EquilibriumAccountInfo>),
    Locks(Vec<(Vec<u8>, U256)>),
    Reserved(EquilibriumAssetId, Option<U256>),
    Raw(Option<Bytes>),
}

fn decode<T>(
    path: StoragePath,
    key: &LocalStorageKey,
    value: Option<&Bytes>,
    decoder: impl FnOnce(&[u8]) -> Result<T, parity_scale_codec::Error>,
) -> Result<Option<T>, DecodeError> {
    value
        .map(|value| decoder(&value[..]))
        .transpose()
        .map_err(|err| DecodeError::InvalidValue(path, key.clone(), err.to_string()))
}

/// Routes every key of an Equilibrium batch to its decoder and updater
pub struct EquilibriumSubscriptionHandler {
    router: SubscriptionRouter,
    balance_updater: EquilibriumBalanceUpdater,
    locks_updater: Option<EquilibriumLocksUpdater>,
    storage_cache: Arc<ChainStorageCache>,
}

impl EquilibriumSubscriptionHandler {
    pub fn new(
        router: SubscriptionRouter,
        balance_updater: EquilibriumBalanceUpdater,
        locks_updater: Option<EquilibriumLocksUpdater>,
        storage_cache: Arc<ChainStorageCache>,
    ) -> Self {
        Self {
            router,
            balance_updater,
            locks_updater,
            storage_cache,
        }
    }

    fn decode_change(
        &self,
        key: &LocalStorageKey,
        value: Option<Bytes>,
    ) -> Result<Decoded, DecodeError> {
        let decoded = match self.router.create_handler(key) {
            HandlerKind::AccountBalances => Decoded::AccountBalances(decode(
                StoragePath::EQUILIBRIUM_BALANCES,
                key,
                value.as_ref(),
                decode_account_info,
            )?),
            HandlerKind::Locks => Decoded::Locks(
                decode(StoragePath::EQUILIBRIUM_LOCKS, key, value.as_ref(), decode_locks)?
                    .unwrap_or_default(),
            ),
            HandlerKind::Reserved(asset_id) => Decoded::Reserved(
                asset_id,
                decode(StoragePath::EQUILIBRIUM_RESERVED, key, value.as_ref(), decode_reserved)?,
            ),
            HandlerKind::Unknown => Decoded::Raw(value),
        };

        Ok(decoded)
    }

    async fn apply(&self, key: &LocalStorageKey, decoded: Decoded, block: Option<BlockHash>) {
        match decoded {
            Decoded::AccountBalances(info) => {
                self.balance_updater.handle_account_balances(info, block).await;
            }
            Decoded::Locks(locks) => match &self.locks_updater {
                Some(locks_updater) => {
                    locks_updater.handle_locks(locks, block).await;
                }
                None => {
                    tracing::debug!(%key, "locks received for a chain without utility asset");
                }
            },
            Decoded::Reserved(asset_id, reserved) => {
                self.balance_updater
                    .handle_reserved_balance(asset_id, reserved, block)
                    .await;
            }
            Decoded::Raw(value) => {
                self.storage_cache.apply(key, value).await;
            }
        }
    }
}

#[async_trait]
impl StorageBatchHandler for EquilibriumSubscriptionHandler {
    async fn handle_batch(&self, batch: StorageBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::new(batch.block);
        let mut account_balances = None;

        for (key, value) in batch.changes {
            match self.decode_change(&key, value) {
                // applied last so the composition sees reserved values of the same block
                Ok(decoded @ Decoded::AccountBalances(_)) => account_balances = Some((key, decoded)),
                Ok(decoded) => {
                    self.apply(&key, decoded, batch.block).await;
                    outcome.applied.push(key);
                }
                Err(err) => {
                    tracing::warn!(
                        account_id = %self.balance_updater.account_id(),
                        error = %err,
                        "unable to decode equilibrium storage change"
                    );
                    outcome.failures.push(err);
                }
            }
        }

        if let Some((key, decoded)) = account_balances {
            self.apply(&key, decoded, batch.block).await;
            outcome.applied.push(key);
        }

        outcome
    }
}
