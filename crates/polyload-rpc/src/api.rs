//! # The chain seam
//!
//! Everything above the transport talks to a node through [`ChainApi`].
//! The WebSocket client implements it for real nodes; the development chain
//! implements it in-process.
//!
//! Long-lived streams are returned as a [`Subscription`]: a typed receiver
//! plus a one-shot cancel action. Calling [`Subscription::unsubscribe`]
//! consumes the handle, so a subscription is cancelled at most once. A
//! handle dropped without an explicit unsubscribe cancels itself in the
//! background.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use polyload_types::{
    AccountId, Block, BlockHash, EventRecord, ExtrinsicHash, Header, TransactionStatus,
};
use tokio::sync::mpsc;

/// Deferred cancel action of a subscription.
pub type CancelFn = Box<dyn FnOnce() -> BoxFuture<'static, polyload_types::Result<()>> + Send>;

/// A typed notification stream.
pub struct Subscription<T> {
    id: String,
    rx: mpsc::UnboundedReceiver<polyload_types::Result<T>>,
    cancel: Option<CancelFn>,
}

impl<T> Subscription<T> {
    #[must_use]
    pub fn new(
        id: String,
        rx: mpsc::UnboundedReceiver<polyload_types::Result<T>>,
        cancel: CancelFn,
    ) -> Self {
        Self {
            id,
            rx,
            cancel: Some(cancel),
        }
    }

    /// Node-assigned subscription id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next item. `None` once the stream is closed by the node or the
    /// connection is gone.
    pub async fn next(&mut self) -> Option<polyload_types::Result<T>> {
        self.rx.recv().await
    }

    /// Cancel the subscription on the node and release the handle.
    pub async fn unsubscribe(mut self) -> polyload_types::Result<()> {
        match self.cancel.take() {
            Some(cancel) => cancel().await,
            None => Ok(()),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let id = self.id.clone();
                handle.spawn(async move {
                    if let Err(e) = cancel().await {
                        tracing::debug!(subscription = %id, error = %e, "background unsubscribe failed");
                    }
                });
            }
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

/// Node operations polyload relies on.
#[async_trait]
pub trait ChainApi: Send + Sync {
    /// `system_accountNextIndex`: next nonce the node expects from `account`,
    /// counting transactions already in its pool.
    async fn account_next_index(&self, account: &AccountId) -> polyload_types::Result<u64>;

    /// `author_submitExtrinsic`: broadcast without watching.
    async fn submit_extrinsic(&self, extrinsic_hex: &str) -> polyload_types::Result<ExtrinsicHash>;

    /// `author_submitAndWatchExtrinsic`: broadcast and stream status updates.
    async fn submit_and_watch(
        &self,
        extrinsic_hex: &str,
    ) -> polyload_types::Result<Subscription<TransactionStatus>>;

    /// `chain_subscribeNewHeads`.
    async fn subscribe_new_heads(&self) -> polyload_types::Result<Subscription<Header>>;

    /// `chain_getBlockHash`: `None` if the block does not exist yet.
    async fn block_hash(&self, number: u64) -> polyload_types::Result<Option<BlockHash>>;

    /// `chain_getBlock`: `None` for an unknown hash.
    async fn block(&self, hash: &BlockHash) -> polyload_types::Result<Option<Block>>;

    /// Events of the block with `hash`, in emission order.
    async fn block_events(&self, hash: &BlockHash) -> polyload_types::Result<Vec<EventRecord>>;

    /// `author_pendingExtrinsics`: hex-encoded extrinsics in the pool.
    async fn pending_extrinsics(&self) -> polyload_types::Result<Vec<String>>;
}

impl std::fmt::Debug for dyn ChainApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ChainApi")
    }
}
