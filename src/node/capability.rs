//! Capabilities a node exposes to its peers
//!
//! Relay-only and store-only peers implement one trait each; callers depend
//! on the narrowest capability they use.

use crate::message::Message;
use crate::sync::{DiffStream, IdBatches};
use crate::transfer::{ContentStream, PullResponse, PushOutcome, TransferResult};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Accepts messages from peers
#[async_trait]
pub trait RelayService: Send + Sync {
    /// Answer batches of ids with whether each message is held here
    fn diff(&self, batches: IdBatches) -> DiffStream;

    /// Receive content for `meta` from `peer`, starting at `offset`
    async fn push(
        &self,
        peer: &str,
        meta: Message,
        offset: u64,
        content: ContentStream,
    ) -> TransferResult<PushOutcome>;

    /// Offset a push of `meta` should resume from
    async fn resume_offset(&self, meta: &Message) -> TransferResult<u64>;
}

/// Serves stored messages to peers
#[async_trait]
pub trait StoreService: Send + Sync {
    /// Stream content of `id` from `offset`
    async fn pull(&self, id: &str, offset: u64) -> TransferResult<PullResponse>;

    /// Lazily enumerate metadata of every non-expired stored message
    fn manifest(&self) -> BoxStream<'_, TransferResult<Message>>;
}

/// A peer that both relays and stores
pub trait MessageNode: RelayService + StoreService {}

impl<T: RelayService + StoreService + ?Sized> MessageNode for T {}
