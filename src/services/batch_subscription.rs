//! One physical multi-key storage subscription on a node connection.
//!
//! Change sets coming from the node are translated to local keys and merged into a single
//! pending batch. A dedicated delivery task hands the pending batch to the handler, so a slow
//! handler sees the latest value of every key instead of a backlog of intermediate states.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Bytes;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::constants::DEFAULT_UNSUBSCRIBE_TIMEOUT_SECS;
use crate::domain::{BlockHash, ChainId, LocalStorageKey, RemoteStorageKey};
use crate::infra::{ChainRegistryError, StorageChangeSet, StorageConnection, WireSubscriptionId};
use crate::services::errors::DecodeError;

/// Latest raw value per local key; `None` means the item was removed from storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageBatch {
    pub block: Option<BlockHash>,
    pub changes: BTreeMap<LocalStorageKey, Option<Bytes>>,
}

impl StorageBatch {
    /// Folds a newer batch in. Values of the newer batch win, keys of the older one are kept.
    pub fn merge(&mut self, newer: StorageBatch) {
        if newer.block.is_some() {
            self.block = newer.block;
        }

        self.changes.extend(newer.changes);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub block: Option<BlockHash>,
    pub applied: Vec<LocalStorageKey>,
    pub failures: Vec<DecodeError>,
}

impl BatchOutcome {
    pub fn new(block: Option<BlockHash>) -> Self {
        Self {
            block,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait StorageBatchHandler: Send + Sync {
    async fn handle_batch(&self, batch: StorageBatch) -> BatchOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryGate {
    /// Batches accumulate but are not handed out yet
    Held,
    Open,
    Closed,
}

enum State {
    Idle,
    Subscribed {
        wire_id: WireSubscriptionId,
        cancel: CancellationToken,
    },
    Closed,
}

#[derive(Default)]
struct PendingBatch {
    batch: Mutex<Option<StorageBatch>>,
    notify: Notify,
}

impl PendingBatch {
    async fn push(&self, batch: StorageBatch) {
        let mut pending = self.batch.lock().await;

        match pending.as_mut() {
            Some(current) => current.merge(batch),
            None => *pending = Some(batch),
        }

        self.notify.notify_one();
    }

    async fn take(&self) -> Option<StorageBatch> {
        self.batch.lock().await.take()
    }
}

pub struct BatchStorageSubscription {
    chain_id: ChainId,
    connection: Arc<dyn StorageConnection>,
    keys: Arc<HashMap<RemoteStorageKey, LocalStorageKey>>,
    handler: Arc<dyn StorageBatchHandler>,
    outcomes: Option<mpsc::Sender<BatchOutcome>>,
    unsubscribe_timeout: Duration,
    state: Mutex<State>,
    gate: Arc<RwLock<DeliveryGate>>,
    pending: Arc<PendingBatch>,
}

impl BatchStorageSubscription {
    pub fn new(
        chain_id: ChainId,
        connection: Arc<dyn StorageConnection>,
        keys: Vec<(RemoteStorageKey, LocalStorageKey)>,
        handler: Arc<dyn StorageBatchHandler>,
        outcomes: Option<mpsc::Sender<BatchOutcome>>,
    ) -> Self {
        Self {
            chain_id,
            connection,
            keys: Arc::new(keys.into_iter().collect()),
            handler,
            outcomes,
            unsubscribe_timeout: Duration::from_secs(DEFAULT_UNSUBSCRIBE_TIMEOUT_SECS),
            state: Mutex::new(State::Idle),
            gate: Arc::new(RwLock::new(DeliveryGate::Open)),
            pending: Arc::new(PendingBatch::default()),
        }
    }

    pub fn with_unsubscribe_timeout(mut self, timeout: Duration) -> Self {
        self.unsubscribe_timeout = timeout;
        self
    }

    /// Received batches are kept until [`Self::resume_delivery`] is called
    pub fn with_delivery_held(self) -> Self {
        Self {
            gate: Arc::new(RwLock::new(DeliveryGate::Held)),
            ..self
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn keys_count(&self) -> usize {
        self.keys.len()
    }

    /// Opens the wire subscription. Calling it on an already subscribed instance is a no-op.
    pub async fn subscribe(&self) -> Result<(), ChainRegistryError> {
        let mut state = self.state.lock().await;

        match &*state {
            State::Subscribed { .. } => return Ok(()),
            State::Closed => {
                tracing::debug!(chain_id = %self.chain_id, "subscribe on closed storage subscription ignored");
                return Ok(());
            }
            State::Idle => {}
        }

        let remote_keys: Vec<RemoteStorageKey> = self.keys.keys().cloned().collect();
        let wire = self.connection.subscribe_storage(remote_keys).await?;
        let cancel = CancellationToken::new();

        self.spawn_pump(wire.changes, cancel.clone());
        self.spawn_delivery(cancel.clone());

        tracing::info!(
            chain_id = %self.chain_id,
            wire_id = %wire.id,
            keys = self.keys.len(),
            "storage subscription opened"
        );

        *state = State::Subscribed {
            wire_id: wire.id,
            cancel,
        };

        Ok(())
    }

    pub async fn resume_delivery(&self) {
        let mut gate = self.gate.write().await;

        if *gate == DeliveryGate::Held {
            *gate = DeliveryGate::Open;
            self.pending.notify.notify_one();
        }
    }

    /// Closes delivery, waiting for a batch in flight, then releases the wire subscription.
    /// No batch reaches the handler once this returns.
    pub async fn unsubscribe(&self) -> Result<(), ChainRegistryError> {
        let mut state = self.state.lock().await;

        *self.gate.write().await = DeliveryGate::Closed;

        let State::Subscribed { wire_id, cancel } = std::mem::replace(&mut *state, State::Closed)
        else {
            return Ok(());
        };

        cancel.cancel();

        tracing::info!(chain_id = %self.chain_id, %wire_id, "storage subscription closed");

        match tokio::time::timeout(
            self.unsubscribe_timeout,
            self.connection.unsubscribe_storage(wire_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ChainRegistryError::Transport(
                "unsubscribe request timed out".to_string(),
            )),
        }
    }

    fn spawn_pump(
        &self,
        mut changes: futures::stream::BoxStream<'static, StorageChangeSet>,
        cancel: CancellationToken,
    ) {
        let keys = Arc::clone(&self.keys);
        let pending = Arc::clone(&self.pending);
        let chain_id = self.chain_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break;
                    }
                    change_set = changes.next() => {
                        let Some(change_set) = change_set else {
                            tracing::warn!(chain_id = %chain_id, "storage change stream ended");
                            break;
                        };

                        let batch = to_local_batch(&chain_id, &keys, change_set);
                        if !batch.is_empty() {
                            pending.push(batch).await;
                        }
                    }
                }
            }
        });
    }

    fn spawn_delivery(&self, cancel: CancellationToken) {
        let pending = Arc::clone(&self.pending);
        let gate = Arc::clone(&self.gate);
        let handler = Arc::clone(&self.handler);
        let outcomes = self.outcomes.clone();
        let chain_id = self.chain_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break;
                    }
                    _ = pending.notify.notified() => {}
                }

                let guard = gate.read().await;

                match *guard {
                    DeliveryGate::Held => continue,
                    DeliveryGate::Closed => break,
                    DeliveryGate::Open => {}
                }

                let Some(batch) = pending.take().await else {
                    continue;
                };

                let outcome = handler.handle_batch(batch).await;
                drop(guard);

                if let Some(outcomes) = &outcomes {
                    let _ = outcomes.try_send(outcome).inspect_err(|err| {
                        tracing::debug!(chain_id = %chain_id, "batch outcome dropped: {err}");
                    });
                }
            }
        });
    }
}

fn to_local_batch(
    chain_id: &ChainId,
    keys: &HashMap<RemoteStorageKey, LocalStorageKey>,
    change_set: StorageChangeSet,
) -> StorageBatch {
    let mut changes = BTreeMap::new();

    for (remote_key, value) in change_set.changes {
        match keys.get(&remote_key) {
            Some(local_key) => {
                changes.insert(local_key.clone(), value);
            }
            None => {
                tracing::warn!(chain_id = %chain_id, %remote_key, "change for a key that was not subscribed");
            }
        }
    }

    StorageBatch {
        block: change_set.block,
        changes,
    }
}
