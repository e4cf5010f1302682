use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::EngineConfig;
use crate::domain::errors::EncodingError;
use crate::domain::ChainId;
use crate::infra::{ChainRegistry, ChainRegistryError};
use crate::services::batch_subscription::{BatchOutcome, BatchStorageSubscription, StorageBatchHandler};
use crate::services::errors::RemoteSubscriptionError;
use crate::services::storage_keys::{CacheKey, SubscriptionRequest};

/// Resolves once the attached subscription became active or failed to open
pub type AttachCallback = oneshot::Sender<Result<(), RemoteSubscriptionError>>;

/// Generation of a registry entry. A new entry for the same [`CacheKey`] never reuses an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a caller keeps to detach later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub cache_key: CacheKey,
    pub subscription_id: SubscriptionId,
}

enum Entry {
    Pending {
        id: SubscriptionId,
        refs: usize,
        callbacks: Vec<AttachCallback>,
    },
    Active {
        id: SubscriptionId,
        refs: usize,
        subscription: Arc<BatchStorageSubscription>,
    },
}

impl Entry {
    fn id(&self) -> SubscriptionId {
        match self {
            Entry::Pending { id, .. } | Entry::Active { id, .. } => *id,
        }
    }

    fn refs_mut(&mut self) -> &mut usize {
        match self {
            Entry::Pending { refs, .. } | Entry::Active { refs, .. } => refs,
        }
    }
}

fn notify(callbacks: Vec<AttachCallback>, result: Result<(), RemoteSubscriptionError>) {
    for callback in callbacks {
        let _ = callback.send(result.clone());
    }
}

/// Registry of physical storage subscriptions. Equal [`CacheKey`]s share one subscription,
/// which is closed when the last holder detaches.
pub struct RemoteSubscriptionService {
    registry: Arc<dyn ChainRegistry>,
    config: EngineConfig,
    generation: AtomicU64,
    subscriptions: Mutex<HashMap<CacheKey, Entry>>,
    outcomes: Option<mpsc::Sender<BatchOutcome>>,
    outcomes_receiver: std::sync::Mutex<Option<mpsc::Receiver<BatchOutcome>>>,
}

impl RemoteSubscriptionService {
    pub fn new(registry: Arc<dyn ChainRegistry>, config: EngineConfig) -> Self {
        let (outcomes, outcomes_receiver) = match config.outcome_channel_capacity {
            Some(capacity) => {
                let (sender, receiver) = mpsc::channel(capacity);
                (Some(sender), Some(receiver))
            }
            None => (None, None),
        };

        Self {
            registry,
            config,
            generation: AtomicU64::new(0),
            subscriptions: Mutex::new(HashMap::new()),
            outcomes,
            outcomes_receiver: std::sync::Mutex::new(outcomes_receiver),
        }
    }

    /// Batch outcomes of every subscription opened by this registry. Available once, and only
    /// when an outcome channel capacity is configured.
    pub fn take_outcomes(&self) -> Option<mpsc::Receiver<BatchOutcome>> {
        self.outcomes_receiver
            .lock()
            .ok()
            .and_then(|mut receiver| receiver.take())
    }

    /// Joins an existing subscription for the same items or starts opening a new one.
    ///
    /// Returns `None` when there is nothing to subscribe to; the failure is also reported
    /// through `callback`. Opening errors arrive only through `callback`.
    pub async fn attach(
        self: &Arc<Self>,
        chain_id: &ChainId,
        requests: Vec<SubscriptionRequest>,
        handler: Arc<dyn StorageBatchHandler>,
        callback: Option<AttachCallback>,
    ) -> Option<SubscriptionHandle> {
        if requests.is_empty() {
            if let Some(callback) = callback {
                let _ = callback.send(Err(RemoteSubscriptionError::NoStorageKeys(chain_id.clone())));
            }
            return None;
        }

        let cache_key = CacheKey::from_requests(chain_id, &requests);
        let mut subscriptions = self.subscriptions.lock().await;

        if let Some(entry) = subscriptions.get_mut(&cache_key) {
            *entry.refs_mut() += 1;
            let subscription_id = entry.id();

            match entry {
                Entry::Pending { callbacks, .. } => callbacks.extend(callback),
                Entry::Active { .. } => {
                    if let Some(callback) = callback {
                        let _ = callback.send(Ok(()));
                    }
                }
            }

            tracing::debug!(%cache_key, %subscription_id, "joined existing storage subscription");

            return Some(SubscriptionHandle {
                cache_key,
                subscription_id,
            });
        }

        let subscription_id = SubscriptionId(self.generation.fetch_add(1, Ordering::Relaxed));

        subscriptions.insert(
            cache_key.clone(),
            Entry::Pending {
                id: subscription_id,
                refs: 1,
                callbacks: callback.into_iter().collect(),
            },
        );

        drop(subscriptions);

        let this = Arc::clone(self);
        let build_key = cache_key.clone();
        let chain_id = chain_id.clone();

        tokio::spawn(async move {
            let result = this.open_subscription(&chain_id, &requests, handler).await;
            this.finish_opening(build_key, subscription_id, result).await;
        });

        Some(SubscriptionHandle {
            cache_key,
            subscription_id,
        })
    }

    /// Releases one reference. The subscription is closed when the last reference is gone.
    /// Detaching with an id of another generation leaves the registry untouched.
    pub async fn detach(
        &self,
        cache_key: &CacheKey,
        subscription_id: SubscriptionId,
    ) -> Result<(), RemoteSubscriptionError> {
        let mut subscriptions = self.subscriptions.lock().await;

        let Some(entry) = subscriptions.get_mut(cache_key) else {
            tracing::warn!(%cache_key, %subscription_id, "detach for unknown subscription");
            return Err(RemoteSubscriptionError::StaleDetach);
        };

        if entry.id() != subscription_id {
            tracing::warn!(
                %cache_key,
                %subscription_id,
                current = %entry.id(),
                "detach with stale subscription id"
            );
            return Err(RemoteSubscriptionError::StaleDetach);
        }

        let refs = entry.refs_mut();
        *refs -= 1;

        if *refs > 0 {
            return Ok(());
        }

        let Some(entry) = subscriptions.remove(cache_key) else {
            return Ok(());
        };

        drop(subscriptions);

        match entry {
            Entry::Pending { callbacks, .. } => {
                tracing::debug!(%cache_key, "subscription detached while opening");
                notify(callbacks, Err(RemoteSubscriptionError::Cancelled));
            }
            Entry::Active { subscription, .. } => {
                Self::close(&subscription).await;
            }
        }

        Ok(())
    }

    /// Entries still opening included
    pub async fn subscriptions_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn active_count(&self) -> usize {
        self.subscriptions
            .lock()
            .await
            .values()
            .filter(|entry| matches!(entry, Entry::Active { .. }))
            .count()
    }

    async fn open_subscription(
        &self,
        chain_id: &ChainId,
        requests: &[SubscriptionRequest],
        handler: Arc<dyn StorageBatchHandler>,
    ) -> Result<Arc<BatchStorageSubscription>, RemoteSubscriptionError> {
        let runtime_provider = self
            .registry
            .runtime_provider(chain_id)
            .ok_or_else(|| ChainRegistryError::RuntimeMetadataUnavailable(chain_id.clone()))?;

        let coder = runtime_provider.fetch_coder().await?;

        let mut keys = Vec::with_capacity(requests.len());

        for request in requests {
            match request.remote_key(coder.as_ref()) {
                Ok(remote_key) => keys.push((remote_key, request.local_key().clone())),
                Err(EncodingError::InvalidStoragePath(path)) => {
                    tracing::warn!(chain_id = %chain_id, %path, "storage path is missing in runtime, skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }

        if keys.is_empty() {
            return Err(RemoteSubscriptionError::NoStorageKeys(chain_id.clone()));
        }

        let connection = self
            .registry
            .connection(chain_id)
            .ok_or_else(|| ChainRegistryError::ConnectionUnavailable(chain_id.clone()))?;

        let subscription = BatchStorageSubscription::new(
            chain_id.clone(),
            connection,
            keys,
            handler,
            self.outcomes.clone(),
        )
        .with_unsubscribe_timeout(self.config.unsubscribe_timeout())
        .with_delivery_held();

        subscription.subscribe().await?;

        Ok(Arc::new(subscription))
    }

    async fn finish_opening(
        &self,
        cache_key: CacheKey,
        subscription_id: SubscriptionId,
        result: Result<Arc<BatchStorageSubscription>, RemoteSubscriptionError>,
    ) {
        let mut subscriptions = self.subscriptions.lock().await;

        match (subscriptions.remove(&cache_key), result) {
            (Some(Entry::Pending { id, refs, callbacks }), Ok(subscription))
                if id == subscription_id =>
            {
                subscription.resume_delivery().await;
                let keys_count = subscription.keys_count();
                subscriptions.insert(
                    cache_key.clone(),
                    Entry::Active {
                        id,
                        refs,
                        subscription,
                    },
                );
                drop(subscriptions);

                tracing::info!(
                    %cache_key,
                    subscription_id = %id,
                    keys = keys_count,
                    "storage subscription is active"
                );
                notify(callbacks, Ok(()));
            }
            (Some(Entry::Pending { id, callbacks, .. }), Err(err)) if id == subscription_id => {
                drop(subscriptions);

                tracing::warn!(%cache_key, error = %err, "unable to open storage subscription");
                notify(callbacks, Err(err));
            }
            (entry, result) => {
                // every holder detached while opening; the key may already have a new generation
                if let Some(entry) = entry {
                    subscriptions.insert(cache_key.clone(), entry);
                }
                drop(subscriptions);

                if let Ok(subscription) = result {
                    Self::close(&subscription).await;
                }
            }
        }
    }

    async fn close(subscription: &BatchStorageSubscription) {
        if let Err(err) = subscription.unsubscribe().await {
            tracing::warn!(
                chain_id = %subscription.chain_id(),
                error = %err,
                "unable to release wire subscription"
            );
        }
    }
}
