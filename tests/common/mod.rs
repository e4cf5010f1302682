#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::Bytes;
use async_trait::async_trait;
use futures::StreamExt;
use parity_scale_codec::Encode;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_stream::wrappers::UnboundedReceiverStream;

use chain_storage_sync::config::EngineConfig;
use chain_storage_sync::domain::errors::EncodingError;
use chain_storage_sync::domain::{
    AccountId, AssetId, AssetKind, AssetModel, BlockHash, ChainId, ChainModel, KeyParam,
    RemoteStorageKey, StoragePath,
};
use chain_storage_sync::infra::{
    ChainRegistry, ChainRegistryError, ChainRegistryEvent, RuntimeCoder, RuntimeProvider,
    StorageChangeSet, StorageConnection, WireSubscription, WireSubscriptionId,
};
use chain_storage_sync::services::assets_updating::{
    AssetBalanceBatchUpdatingService, ChainAssetsSubscriber, MetaAccount,
};
use chain_storage_sync::services::equilibrium::EquilibriumSubscriptionService;
use chain_storage_sync::services::errors::RemoteSubscriptionError;
use chain_storage_sync::services::subscription_manager::{
    AttachCallback, RemoteSubscriptionService, SubscriptionHandle,
};
use chain_storage_sync::services::updaters::{
    AssetBalanceStore, AssetLocksStore, BalanceEventPublisher, ChainStorageCache,
};

pub const EQ: u64 = 25_969;
pub const BTC: u64 = 6_452_323;
pub const ETH: u64 = 6_648_936;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds, failing the test after five seconds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}

#[derive(Default)]
pub struct FakeCoder {
    missing_paths: HashSet<StoragePath>,
}

impl FakeCoder {
    pub fn without(paths: impl IntoIterator<Item = StoragePath>) -> Self {
        Self {
            missing_paths: paths.into_iter().collect(),
        }
    }

    pub fn remote_key(path: StoragePath, params: &[KeyParam]) -> RemoteStorageKey {
        let mut encoded = Vec::new();
        path.module.encode_to(&mut encoded);
        path.item.encode_to(&mut encoded);
        params.encode_to(&mut encoded);
        RemoteStorageKey::new(encoded)
    }
}

impl RuntimeCoder for FakeCoder {
    fn storage_key(
        &self,
        path: &StoragePath,
        params: &[KeyParam],
    ) -> Result<RemoteStorageKey, EncodingError> {
        if self.missing_paths.contains(path) {
            return Err(EncodingError::InvalidStoragePath(*path));
        }

        Ok(Self::remote_key(*path, params))
    }
}

pub struct FakeRuntimeProvider {
    ready: AtomicBool,
    coder: Arc<FakeCoder>,
    permits: Semaphore,
}

impl FakeRuntimeProvider {
    pub fn ready() -> Self {
        Self::with_coder(FakeCoder::default())
    }

    pub fn with_coder(coder: FakeCoder) -> Self {
        Self {
            ready: AtomicBool::new(true),
            coder: Arc::new(coder),
            permits: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }

    /// `fetch_coder` blocks until [`Self::release`] is called
    pub fn held() -> Self {
        Self {
            permits: Semaphore::new(0),
            ..Self::ready()
        }
    }

    pub fn not_ready() -> Self {
        let provider = Self::ready();
        provider.set_ready(false);
        provider
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.permits.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl RuntimeProvider for FakeRuntimeProvider {
    fn has_snapshot(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn fetch_coder(&self) -> Result<Arc<dyn RuntimeCoder>, ChainRegistryError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| ChainRegistryError::Transport(err.to_string()))?;

        Ok(self.coder.clone())
    }
}

#[derive(Default)]
pub struct FakeConnection {
    sinks: Mutex<Vec<mpsc::UnboundedSender<StorageChangeSet>>>,
    subscribed_keys: Mutex<Vec<Vec<RemoteStorageKey>>>,
    unsubscribed: AtomicUsize,
}

impl FakeConnection {
    pub fn subscribed(&self) -> usize {
        self.subscribed_keys.lock().unwrap().len()
    }

    pub fn unsubscribed(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    pub fn last_keys(&self) -> Vec<RemoteStorageKey> {
        self.subscribed_keys
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }

    /// Sends the change set to every wire subscription that is still open
    pub fn push(&self, block: Option<BlockHash>, changes: Vec<(RemoteStorageKey, Option<Bytes>)>) {
        let change_set = StorageChangeSet { block, changes };
        self.sinks
            .lock()
            .unwrap()
            .retain(|sink| sink.send(change_set.clone()).is_ok());
    }
}

#[async_trait]
impl StorageConnection for FakeConnection {
    async fn subscribe_storage(
        &self,
        keys: Vec<RemoteStorageKey>,
    ) -> Result<WireSubscription, ChainRegistryError> {
        let (sink, changes) = mpsc::unbounded_channel();
        let id = {
            let mut subscribed = self.subscribed_keys.lock().unwrap();
            subscribed.push(keys);
            subscribed.len()
        };
        self.sinks.lock().unwrap().push(sink);

        Ok(WireSubscription {
            id: format!("wire-{id}"),
            changes: UnboundedReceiverStream::new(changes).boxed(),
        })
    }

    async fn unsubscribe_storage(&self, _id: WireSubscriptionId) -> Result<(), ChainRegistryError> {
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeChainRegistry {
    chains: Mutex<HashMap<ChainId, ChainModel>>,
    connections: Mutex<HashMap<ChainId, Arc<FakeConnection>>>,
    providers: Mutex<HashMap<ChainId, Arc<FakeRuntimeProvider>>>,
    events: broadcast::Sender<ChainRegistryEvent>,
}

impl Default for FakeChainRegistry {
    fn default() -> Self {
        Self {
            chains: Mutex::default(),
            connections: Mutex::default(),
            providers: Mutex::default(),
            events: broadcast::channel(64).0,
        }
    }
}

impl FakeChainRegistry {
    pub fn add_chain(&self, chain: ChainModel) {
        self.chains.lock().unwrap().insert(chain.chain_id.clone(), chain);
    }

    pub fn set_connection(&self, chain_id: &ChainId, connection: Arc<FakeConnection>) {
        self.connections
            .lock()
            .unwrap()
            .insert(chain_id.clone(), connection);
    }

    pub fn remove_connection(&self, chain_id: &ChainId) {
        self.connections.lock().unwrap().remove(chain_id);
    }

    pub fn set_provider(&self, chain_id: &ChainId, provider: Arc<FakeRuntimeProvider>) {
        self.providers.lock().unwrap().insert(chain_id.clone(), provider);
    }

    pub fn send(&self, event: ChainRegistryEvent) {
        let _ = self.events.send(event);
    }
}

impl ChainRegistry for FakeChainRegistry {
    fn connection(&self, chain_id: &ChainId) -> Option<Arc<dyn StorageConnection>> {
        self.connections
            .lock()
            .unwrap()
            .get(chain_id)
            .map(|connection| connection.clone() as Arc<dyn StorageConnection>)
    }

    fn runtime_provider(&self, chain_id: &ChainId) -> Option<Arc<dyn RuntimeProvider>> {
        self.providers
            .lock()
            .unwrap()
            .get(chain_id)
            .map(|provider| provider.clone() as Arc<dyn RuntimeProvider>)
    }

    fn chain(&self, chain_id: &ChainId) -> Option<ChainModel> {
        self.chains.lock().unwrap().get(chain_id).cloned()
    }

    fn chains(&self) -> Vec<ChainModel> {
        self.chains.lock().unwrap().values().cloned().collect()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ChainRegistryEvent> {
        self.events.subscribe()
    }
}

/// Counts calls going through to the wrapped subscriber
pub struct RecordingSubscriber {
    inner: Arc<dyn ChainAssetsSubscriber>,
    attached: Mutex<Vec<BTreeSet<AssetId>>>,
    detached: AtomicUsize,
}

impl RecordingSubscriber {
    pub fn new(inner: Arc<dyn ChainAssetsSubscriber>) -> Self {
        Self {
            inner,
            attached: Mutex::default(),
            detached: AtomicUsize::new(0),
        }
    }

    pub fn attached(&self) -> Vec<BTreeSet<AssetId>> {
        self.attached.lock().unwrap().clone()
    }

    pub fn detached(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainAssetsSubscriber for RecordingSubscriber {
    fn supported_asset_ids(&self, chain: &ChainModel) -> BTreeSet<AssetId> {
        self.inner.supported_asset_ids(chain)
    }

    async fn attach(
        &self,
        chain: &ChainModel,
        account_id: &AccountId,
        asset_ids: &BTreeSet<AssetId>,
        callback: AttachCallback,
    ) -> Option<SubscriptionHandle> {
        self.attached.lock().unwrap().push(asset_ids.clone());
        self.inner.attach(chain, account_id, asset_ids, callback).await
    }

    async fn detach(&self, handle: &SubscriptionHandle) -> Result<(), RemoteSubscriptionError> {
        self.detached.fetch_add(1, Ordering::SeqCst);
        self.inner.detach(handle).await
    }
}

pub fn chain_id() -> ChainId {
    ChainId::new("89d3ec46d2fb43ef5a9713833373d5ea666b092fa8fd68fbfc0c3e9ca4f4b5ab")
}

pub fn account_id() -> AccountId {
    AccountId::new(vec![7; 32])
}

pub fn meta_account() -> MetaAccount {
    MetaAccount {
        substrate_account_id: Some(account_id()),
        ..MetaAccount::default()
    }
}

/// Equilibrium chain with EQ (utility), BTC and ETH; `enabled` picks the enabled asset ids
pub fn equilibrium_chain(enabled: &[AssetId]) -> ChainModel {
    let asset = |asset_id: AssetId, symbol: &str, on_chain_id: u64| AssetModel {
        asset_id,
        symbol: symbol.to_string(),
        enabled: enabled.contains(&asset_id),
        is_utility: asset_id == 0,
        kind: AssetKind::Equilibrium { on_chain_id },
    };

    ChainModel {
        chain_id: chain_id(),
        name: "Equilibrium".to_string(),
        is_ethereum_based: false,
        assets: vec![asset(0, "EQ", EQ), asset(1, "BTC", BTC), asset(2, "ETH", ETH)],
    }
}

pub fn balances_key() -> RemoteStorageKey {
    FakeCoder::remote_key(
        StoragePath::EQUILIBRIUM_BALANCES,
        &[KeyParam::Account(account_id())],
    )
}

pub fn reserved_key(eq_asset_id: u64) -> RemoteStorageKey {
    FakeCoder::remote_key(
        StoragePath::EQUILIBRIUM_RESERVED,
        &[KeyParam::Account(account_id()), KeyParam::U64(eq_asset_id)],
    )
}

pub fn locks_key() -> RemoteStorageKey {
    FakeCoder::remote_key(StoragePath::EQUILIBRIUM_LOCKS, &[KeyParam::Account(account_id())])
}

pub struct Harness {
    pub registry: Arc<FakeChainRegistry>,
    pub connection: Arc<FakeConnection>,
    pub provider: Arc<FakeRuntimeProvider>,
    pub remote_subscriptions: Arc<RemoteSubscriptionService>,
    pub balances: Arc<AssetBalanceStore>,
    pub locks: Arc<AssetLocksStore>,
    pub subscriber: Arc<RecordingSubscriber>,
    pub service: Arc<AssetBalanceBatchUpdatingService>,
}

impl Harness {
    pub fn new(chain: ChainModel, provider: FakeRuntimeProvider) -> Self {
        init_tracing();

        let registry = Arc::new(FakeChainRegistry::default());
        let connection = Arc::new(FakeConnection::default());
        let provider = Arc::new(provider);

        registry.set_connection(&chain.chain_id, connection.clone());
        registry.set_provider(&chain.chain_id, provider.clone());
        registry.add_chain(chain);

        let config = EngineConfig::default();
        let publisher = BalanceEventPublisher::from_config(&config, None);

        let remote_subscriptions = Arc::new(RemoteSubscriptionService::new(registry.clone(), config));

        let balances = Arc::new(AssetBalanceStore::new(publisher.clone()));
        let locks = Arc::new(AssetLocksStore::new(publisher));

        let equilibrium = Arc::new(EquilibriumSubscriptionService::new(
            remote_subscriptions.clone(),
            balances.clone(),
            locks.clone(),
            Arc::new(ChainStorageCache::new()),
        ));

        let subscriber = Arc::new(RecordingSubscriber::new(equilibrium));

        let service = Arc::new(AssetBalanceBatchUpdatingService::new(
            registry.clone(),
            subscriber.clone(),
            Arc::new(meta_account()),
        ));

        Self {
            registry,
            connection,
            provider,
            remote_subscriptions,
            balances,
            locks,
            subscriber,
            service,
        }
    }

    /// Waits until `count` wire subscriptions were opened
    pub async fn wait_subscribed(&self, count: usize) {
        let connection = self.connection.clone();
        wait_until(|| {
            let connection = connection.clone();
            async move { connection.subscribed() >= count }
        })
        .await;
    }

    pub async fn wait_active(&self, count: usize) {
        let remote_subscriptions = self.remote_subscriptions.clone();
        wait_until(|| {
            let remote_subscriptions = remote_subscriptions.clone();
            async move { remote_subscriptions.active_count().await == count }
        })
        .await;
    }
}
