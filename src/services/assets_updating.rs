//! Keeps one storage subscription per chain in line with the selected account and the
//! enabled assets of the chain. Any difference in the asset set rebuilds the chain
//! subscription as a whole.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::domain::{AccountId, AssetId, ChainChange, ChainId, ChainModel};
use crate::infra::{ChainRegistry, ChainRegistryEvent};
use crate::services::errors::RemoteSubscriptionError;
use crate::services::subscription_manager::{AttachCallback, SubscriptionHandle};

/// Chain specific part of the diffing service: which assets it can watch and how to
/// subscribe to them
#[async_trait]
pub trait ChainAssetsSubscriber: Send + Sync {
    fn supported_asset_ids(&self, chain: &ChainModel) -> BTreeSet<AssetId>;

    async fn attach(
        &self,
        chain: &ChainModel,
        account_id: &AccountId,
        asset_ids: &BTreeSet<AssetId>,
        callback: AttachCallback,
    ) -> Option<SubscriptionHandle>;

    async fn detach(&self, handle: &SubscriptionHandle) -> Result<(), RemoteSubscriptionError>;
}

pub trait SelectedAccountProvider: Send + Sync {
    fn account_id(&self, chain: &ChainModel) -> Option<AccountId>;
}

/// Wallet account with a substrate id, an ethereum address and per-chain overrides
#[derive(Debug, Clone, Default)]
pub struct MetaAccount {
    pub substrate_account_id: Option<AccountId>,
    pub ethereum_address: Option<AccountId>,
    pub chain_accounts: HashMap<ChainId, AccountId>,
}

impl SelectedAccountProvider for MetaAccount {
    fn account_id(&self, chain: &ChainModel) -> Option<AccountId> {
        if let Some(account_id) = self.chain_accounts.get(&chain.chain_id) {
            return Some(account_id.clone());
        }

        if chain.is_ethereum_based {
            self.ethereum_address.clone()
        } else {
            self.substrate_account_id.clone()
        }
    }
}

struct ChainSubscription {
    handle: SubscriptionHandle,
    account_id: AccountId,
    asset_ids: BTreeSet<AssetId>,
}

struct State {
    subscriptions: HashMap<ChainId, ChainSubscription>,
    account: Arc<dyn SelectedAccountProvider>,
}

pub struct AssetBalanceBatchUpdatingService {
    registry: Arc<dyn ChainRegistry>,
    subscriber: Arc<dyn ChainAssetsSubscriber>,
    state: Mutex<State>,
    cancel_token: std::sync::Mutex<Option<CancellationToken>>,
}

impl AssetBalanceBatchUpdatingService {
    pub fn new(
        registry: Arc<dyn ChainRegistry>,
        subscriber: Arc<dyn ChainAssetsSubscriber>,
        account: Arc<dyn SelectedAccountProvider>,
    ) -> Self {
        Self {
            registry,
            subscriber,
            state: Mutex::new(State {
                subscriptions: HashMap::new(),
                account,
            }),
            cancel_token: std::sync::Mutex::new(None),
        }
    }

    /// Subscribes every known chain and starts following registry events.
    /// Calling it again while running is a no-op.
    pub async fn setup(self: &Arc<Self>) {
        let cancel = {
            let Ok(mut current) = self.cancel_token.lock() else {
                tracing::error!("service state is poisoned, setup skipped");
                return;
            };

            if current.is_some() {
                return;
            }

            let cancel = CancellationToken::new();
            *current = Some(cancel.clone());
            cancel
        };

        let events = self.registry.subscribe_events();

        for chain in self.registry.chains() {
            self.update_subscription(&chain).await;
        }

        self.spawn_events_listener(events, cancel);
    }

    /// Stops following registry events and removes every subscription
    pub async fn throttle(&self) {
        if let Ok(mut current) = self.cancel_token.lock() {
            if let Some(cancel) = current.take() {
                cancel.cancel();
            }
        }

        self.remove_all().await;
    }

    pub async fn update_selected_account(self: &Arc<Self>, account: Arc<dyn SelectedAccountProvider>) {
        {
            let mut state = self.state.lock().await;
            Self::detach_all(&*self.subscriber, &mut state).await;
            state.account = account;
        }

        for chain in self.registry.chains() {
            self.update_subscription(&chain).await;
        }
    }

    pub async fn handle_chain_changes(self: &Arc<Self>, changes: Vec<ChainChange>) {
        for change in changes {
            match change {
                ChainChange::Insert(chain) | ChainChange::Update(chain) => {
                    self.update_subscription(&chain).await;
                }
                ChainChange::Delete(chain_id) => {
                    if let Err(err) = self.remove_subscription(&chain_id).await {
                        tracing::warn!(chain_id = %chain_id, error = %err, "unable to remove subscription");
                    }
                }
            }
        }
    }

    /// Retries chains that have no active subscription yet
    pub async fn handle_runtime_ready(self: &Arc<Self>, chain_id: &ChainId) {
        if self.state.lock().await.subscriptions.contains_key(chain_id) {
            return;
        }

        match self.registry.chain(chain_id) {
            Some(chain) => self.update_subscription(&chain).await,
            None => tracing::debug!(chain_id = %chain_id, "runtime is ready for unknown chain"),
        }
    }

    /// Brings the chain subscription in line with the chain model and the selected account
    pub async fn update_subscription(self: &Arc<Self>, chain: &ChainModel) {
        let mut state = self.state.lock().await;

        let account_id = state.account.account_id(chain);
        let asset_ids = match &account_id {
            Some(_) => self.subscriber.supported_asset_ids(chain),
            None => BTreeSet::new(),
        };

        let unchanged = match state.subscriptions.get(&chain.chain_id) {
            Some(current) => {
                Some(&current.account_id) == account_id.as_ref() && current.asset_ids == asset_ids
            }
            None => asset_ids.is_empty(),
        };

        if unchanged {
            return;
        }

        if let Some(current) = state.subscriptions.remove(&chain.chain_id) {
            self.detach(&current).await;
        }

        let Some(account_id) = account_id else {
            return;
        };

        if asset_ids.is_empty() {
            return;
        }

        let has_runtime = self
            .registry
            .runtime_provider(&chain.chain_id)
            .is_some_and(|provider| provider.has_snapshot());

        // teardown above never waits for the runtime, only the attach does
        if !has_runtime {
            tracing::debug!(chain_id = %chain.chain_id, "runtime is not ready, subscription postponed");
            return;
        }

        let (callback, attached) = oneshot::channel();

        let Some(handle) = self
            .subscriber
            .attach(chain, &account_id, &asset_ids, callback)
            .await
        else {
            tracing::warn!(chain_id = %chain.chain_id, "unable to attach asset balances subscription");
            return;
        };

        tracing::info!(
            chain_id = %chain.chain_id,
            account_id = %account_id,
            assets = asset_ids.len(),
            "asset balances subscription attached"
        );

        state.subscriptions.insert(
            chain.chain_id.clone(),
            ChainSubscription {
                handle: handle.clone(),
                account_id,
                asset_ids,
            },
        );

        self.watch_attach_result(chain.chain_id.clone(), handle, attached);
    }

    pub async fn remove_subscription(&self, chain_id: &ChainId) -> Result<(), RemoteSubscriptionError> {
        let mut state = self.state.lock().await;

        let Some(current) = state.subscriptions.remove(chain_id) else {
            return Err(RemoteSubscriptionError::MissingActiveSubscription(chain_id.clone()));
        };

        self.detach(&current).await;

        Ok(())
    }

    pub async fn subscribed_assets(&self, chain_id: &ChainId) -> Option<BTreeSet<AssetId>> {
        let state = self.state.lock().await;
        state
            .subscriptions
            .get(chain_id)
            .map(|subscription| subscription.asset_ids.clone())
    }

    async fn remove_all(&self) {
        let mut state = self.state.lock().await;
        Self::detach_all(&*self.subscriber, &mut state).await;
    }

    async fn detach_all(subscriber: &dyn ChainAssetsSubscriber, state: &mut State) {
        for (chain_id, subscription) in state.subscriptions.drain() {
            if let Err(err) = subscriber.detach(&subscription.handle).await {
                tracing::warn!(chain_id = %chain_id, error = %err, "unable to detach subscription");
            }
        }
    }

    async fn detach(&self, subscription: &ChainSubscription) {
        if let Err(err) = self.subscriber.detach(&subscription.handle).await {
            tracing::warn!(
                chain_id = %subscription.handle.cache_key.chain_id(),
                error = %err,
                "unable to detach subscription"
            );
        }
    }

    /// A failed attach leaves the chain without subscription, so the next change or
    /// `RuntimeReady` retries it
    fn watch_attach_result(
        self: &Arc<Self>,
        chain_id: ChainId,
        handle: SubscriptionHandle,
        attached: oneshot::Receiver<Result<(), RemoteSubscriptionError>>,
    ) {
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let err = match attached.await {
                Ok(Ok(())) | Ok(Err(RemoteSubscriptionError::Cancelled)) | Err(_) => return,
                Ok(Err(err)) => err,
            };

            tracing::warn!(chain_id = %chain_id, error = %err, "asset balances subscription failed");

            let mut state = this.state.lock().await;
            let is_current = state
                .subscriptions
                .get(&chain_id)
                .is_some_and(|current| current.handle == handle);

            if is_current {
                state.subscriptions.remove(&chain_id);
            }
        });
    }

    fn spawn_events_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<ChainRegistryEvent>,
        cancel: CancellationToken,
    ) {
        let this = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(ChainRegistryEvent::ChainsChanged(changes)) => {
                            this.handle_chain_changes(changes).await;
                        }
                        Ok(ChainRegistryEvent::RuntimeReady(chain_id)) => {
                            this.handle_runtime_ready(&chain_id).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "registry events lagged, resyncing all chains");
                            this.resync().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("registry events closed");
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn resync(self: &Arc<Self>) {
        let chains = self.registry.chains();
        let known: BTreeSet<ChainId> = chains.iter().map(|chain| chain.chain_id.clone()).collect();

        let removed: Vec<ChainId> = {
            let state = self.state.lock().await;
            state
                .subscriptions
                .keys()
                .filter(|chain_id| !known.contains(*chain_id))
                .cloned()
                .collect()
        };

        for chain_id in removed {
            let _ = self.remove_subscription(&chain_id).await;
        }

        for chain in chains {
            self.update_subscription(&chain).await;
        }
    }
}
