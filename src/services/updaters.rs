//! Authoritative owners of decoded balance state.
//!
//! Every store applies a full replacement of one record, compares it with what it already
//! holds and publishes a [`BalanceEvent`] only on effective change, so duplicate delivery of
//! the same chain state is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::config::EngineConfig;
use crate::domain::{
    AccountId, AssetBalance, AssetId, AssetLock, BalanceEvent, BalanceSnapshot, BlockHash,
    ChainAssetId, ChainId, LocalStorageKey,
};
use crate::services::errors::RepositoryError;

/// Persistence layer for balance changes, owned by the host application
#[async_trait]
pub trait BalanceRepository: Send + Sync {
    async fn persist(&self, event: &BalanceEvent) -> Result<(), RepositoryError>;
}

/// Fans out balance events. With a repository attached, events are written by a single
/// writer task in publish order and only broadcast once the write succeeded.
#[derive(Clone)]
pub struct BalanceEventPublisher {
    sender: broadcast::Sender<BalanceEvent>,
    writer: Option<mpsc::UnboundedSender<BalanceEvent>>,
}

impl BalanceEventPublisher {
    pub fn new(capacity: usize, repository: Option<Arc<dyn BalanceRepository>>) -> Self {
        let (sender, _) = broadcast::channel::<BalanceEvent>(capacity);

        let writer = repository.map(|repository| {
            let (writer, mut pending) = mpsc::unbounded_channel::<BalanceEvent>();
            let sender = sender.clone();

            tokio::spawn(async move {
                while let Some(event) = pending.recv().await {
                    if let Err(err) = repository.persist(&event).await {
                        tracing::error!(
                            error = %err,
                            chain_asset_id = %event.chain_asset_id(),
                            "unable to persist balance change"
                        );
                        continue;
                    }

                    Self::broadcast(&sender, event);
                }
            });

            writer
        });

        Self { sender, writer }
    }

    pub fn from_config(config: &EngineConfig, repository: Option<Arc<dyn BalanceRepository>>) -> Self {
        Self::new(config.event_channel_capacity, repository)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalanceEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: BalanceEvent) {
        match &self.writer {
            Some(writer) => {
                if let Err(err) = writer.send(event) {
                    tracing::error!("balance writer is gone, dropping event: {:?}", err.0);
                }
            }
            None => Self::broadcast(&self.sender, event),
        }
    }

    fn broadcast(sender: &broadcast::Sender<BalanceEvent>, event: BalanceEvent) {
        let _ = sender.send(event).inspect_err(|err| {
            tracing::debug!("no listeners for balance event: {err}");
        });
    }
}

type RecordKey = (ChainAssetId, AccountId);

pub struct AssetBalanceStore {
    balances: RwLock<HashMap<RecordKey, AssetBalance>>,
    publisher: BalanceEventPublisher,
}

impl AssetBalanceStore {
    pub fn new(publisher: BalanceEventPublisher) -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    /// Returns `true` when the stored record changed
    pub async fn apply(
        &self,
        account_id: &AccountId,
        chain_asset_id: &ChainAssetId,
        snapshot: BalanceSnapshot,
        block: Option<BlockHash>,
    ) -> bool {
        let record = AssetBalance {
            chain_asset_id: chain_asset_id.clone(),
            account_id: account_id.clone(),
            free: snapshot.free,
            reserved: snapshot.reserved,
            frozen: snapshot.frozen,
        };

        let mut balances = self.balances.write().await;
        let key = (chain_asset_id.clone(), account_id.clone());

        if balances.get(&key) == Some(&record) {
            return false;
        }

        balances.insert(key, record.clone());

        // published under the lock so events of one record keep apply order
        self.publisher.publish(BalanceEvent::AssetBalanceChanged {
            balance: record,
            block,
        });

        true
    }

    pub async fn remove(
        &self,
        account_id: &AccountId,
        chain_asset_id: &ChainAssetId,
        block: Option<BlockHash>,
    ) -> bool {
        let mut balances = self.balances.write().await;

        if balances
            .remove(&(chain_asset_id.clone(), account_id.clone()))
            .is_none()
        {
            return false;
        }

        self.publisher.publish(BalanceEvent::AssetBalanceRemoved {
            chain_asset_id: chain_asset_id.clone(),
            account_id: account_id.clone(),
            block,
        });

        true
    }

    pub async fn balance(
        &self,
        chain_asset_id: &ChainAssetId,
        account_id: &AccountId,
    ) -> Option<AssetBalance> {
        let balances = self.balances.read().await;
        balances
            .get(&(chain_asset_id.clone(), account_id.clone()))
            .cloned()
    }

    /// Assets of the chain that have a stored record for the account
    pub async fn asset_ids(&self, chain_id: &ChainId, account_id: &AccountId) -> Vec<AssetId> {
        let balances = self.balances.read().await;
        balances
            .keys()
            .filter(|(chain_asset_id, owner)| {
                chain_asset_id.chain_id == *chain_id && owner == account_id
            })
            .map(|(chain_asset_id, _)| chain_asset_id.asset_id)
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalanceEvent> {
        self.publisher.subscribe()
    }
}

pub struct AssetLocksStore {
    locks: RwLock<HashMap<RecordKey, Vec<AssetLock>>>,
    publisher: BalanceEventPublisher,
}

impl AssetLocksStore {
    pub fn new(publisher: BalanceEventPublisher) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    /// Replaces the whole lock set. A repeated lock type overrides the earlier slot.
    pub async fn apply(
        &self,
        account_id: &AccountId,
        chain_asset_id: &ChainAssetId,
        decoded: Vec<(Vec<u8>, U256)>,
        block: Option<BlockHash>,
    ) -> bool {
        let slots: BTreeMap<Vec<u8>, U256> = decoded.into_iter().collect();
        let new_locks: Vec<AssetLock> = slots
            .into_iter()
            .map(|(lock_type, amount)| AssetLock {
                chain_asset_id: chain_asset_id.clone(),
                account_id: account_id.clone(),
                lock_type,
                amount,
            })
            .collect();

        let mut locks = self.locks.write().await;
        let key = (chain_asset_id.clone(), account_id.clone());
        let current = locks.get(&key).map(Vec::as_slice).unwrap_or_default();

        if current == new_locks.as_slice() {
            return false;
        }

        locks.insert(key, new_locks.clone());

        self.publisher.publish(BalanceEvent::AssetLocksChanged {
            chain_asset_id: chain_asset_id.clone(),
            account_id: account_id.clone(),
            locks: new_locks,
            block,
        });

        true
    }

    pub async fn locks(&self, chain_asset_id: &ChainAssetId, account_id: &AccountId) -> Vec<AssetLock> {
        let locks = self.locks.read().await;
        locks
            .get(&(chain_asset_id.clone(), account_id.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalanceEvent> {
        self.publisher.subscribe()
    }
}

/// Raw local cache for storage items without a dedicated handler
#[derive(Default)]
pub struct ChainStorageCache {
    items: RwLock<HashMap<LocalStorageKey, Bytes>>,
}

impl ChainStorageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn apply(&self, key: &LocalStorageKey, value: Option<Bytes>) -> bool {
        let mut items = self.items.write().await;

        match value {
            Some(value) => items.insert(key.clone(), value.clone()).as_ref() != Some(&value),
            None => items.remove(key).is_some(),
        }
    }

    pub async fn get(&self, key: &LocalStorageKey) -> Option<Bytes> {
        self.items.read().await.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChainId;
    use std::sync::Mutex;

    fn chain_asset() -> ChainAssetId {
        ChainAssetId::new(ChainId::new("eq"), 0)
    }

    fn account() -> AccountId {
        AccountId::new(vec![9; 32])
    }

    fn snapshot(free: u128) -> BalanceSnapshot {
        BalanceSnapshot {
            free: U256::from(free),
            reserved: U256::from(5u8),
            frozen: U256::ZERO,
        }
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let store = AssetBalanceStore::new(BalanceEventPublisher::new(16, None));
        let mut events = store.subscribe();

        assert!(store.apply(&account(), &chain_asset(), snapshot(100), None).await);
        let first = store.balance(&chain_asset(), &account()).await;

        assert!(!store.apply(&account(), &chain_asset(), snapshot(100), None).await);
        let second = store.balance(&chain_asset(), &account()).await;

        assert_eq!(first, second);
        assert!(matches!(
            events.try_recv(),
            Ok(BalanceEvent::AssetBalanceChanged { .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn removal_of_missing_record_is_noop() {
        let store = AssetBalanceStore::new(BalanceEventPublisher::new(16, None));

        assert!(!store.remove(&account(), &chain_asset(), None).await);

        store.apply(&account(), &chain_asset(), snapshot(1), None).await;
        assert!(store.remove(&account(), &chain_asset(), None).await);
        assert_eq!(store.balance(&chain_asset(), &account()).await, None);
    }

    #[tokio::test]
    async fn asset_ids_are_scoped_to_chain_and_account() {
        let store = AssetBalanceStore::new(BalanceEventPublisher::new(16, None));
        let other_chain = ChainAssetId::new(ChainId::new("other"), 3);
        let second_asset = ChainAssetId::new(ChainId::new("eq"), 1);

        store.apply(&account(), &chain_asset(), snapshot(1), None).await;
        store.apply(&account(), &second_asset, snapshot(2), None).await;
        store.apply(&account(), &other_chain, snapshot(3), None).await;
        store
            .apply(&AccountId::new(vec![1; 32]), &chain_asset(), snapshot(4), None)
            .await;

        let mut asset_ids = store.asset_ids(&ChainId::new("eq"), &account()).await;
        asset_ids.sort_unstable();

        assert_eq!(asset_ids, vec![0, 1]);
    }

    #[tokio::test]
    async fn duplicate_lock_types_replace_slot() {
        let store = AssetLocksStore::new(BalanceEventPublisher::new(16, None));

        let changed = store
            .apply(
                &account(),
                &chain_asset(),
                vec![
                    (b"staking ".to_vec(), U256::from(10u8)),
                    (b"vesting ".to_vec(), U256::from(20u8)),
                    (b"staking ".to_vec(), U256::from(30u8)),
                ],
                None,
            )
            .await;

        assert!(changed);

        let locks = store.locks(&chain_asset(), &account()).await;
        assert_eq!(locks.len(), 2);
        assert_eq!(locks[0].lock_type, b"staking ".to_vec());
        assert_eq!(locks[0].amount, U256::from(30u8));
    }

    #[tokio::test]
    async fn lock_order_does_not_matter() {
        let store = AssetLocksStore::new(BalanceEventPublisher::new(16, None));
        let a = (b"a".to_vec(), U256::from(1u8));
        let b = (b"b".to_vec(), U256::from(2u8));

        assert!(store.apply(&account(), &chain_asset(), vec![a.clone(), b.clone()], None).await);
        assert!(!store.apply(&account(), &chain_asset(), vec![b, a], None).await);
        assert!(store.apply(&account(), &chain_asset(), vec![], None).await);
        assert!(store.locks(&chain_asset(), &account()).await.is_empty());
    }

    struct RecordingRepository {
        persisted: Mutex<Vec<BalanceEvent>>,
    }

    #[async_trait]
    impl BalanceRepository for RecordingRepository {
        async fn persist(&self, event: &BalanceEvent) -> Result<(), RepositoryError> {
            self.persisted.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_are_broadcast_after_persisting() {
        let repository = Arc::new(RecordingRepository {
            persisted: Mutex::new(Vec::new()),
        });
        let publisher = BalanceEventPublisher::new(16, Some(repository.clone()));
        let store = AssetBalanceStore::new(publisher);
        let mut events = store.subscribe();

        assert!(store.apply(&account(), &chain_asset(), snapshot(7), None).await);

        let event = events.recv().await.unwrap();
        assert_eq!(repository.persisted.lock().unwrap().as_slice(), &[event]);
    }

    #[tokio::test]
    async fn raw_cache_tracks_changes() {
        let cache = ChainStorageCache::new();
        let key = crate::services::storage_keys::create_local_key(
            &crate::domain::StoragePath::new("System", "Number"),
            &ChainId::new("eq"),
            &[],
        )
        .unwrap();

        assert!(cache.apply(&key, Some(Bytes::from(vec![1u8]))).await);
        assert!(!cache.apply(&key, Some(Bytes::from(vec![1u8]))).await);
        assert!(cache.apply(&key, None).await);
        assert_eq!(cache.get(&key).await, None);
    }
}
