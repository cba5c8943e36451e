use crate::message::Message;
use crate::relay::RelayDecision;
use crate::transfer::error::TransferResult;
use bytes::Bytes;
use futures::stream::{BoxStream, TryStreamExt};
use std::io;

/// Content supplied by a pushing peer
pub type ContentStream = BoxStream<'static, io::Result<Bytes>>;

/// Content served to a pulling peer
pub type PullStream = BoxStream<'static, TransferResult<Bytes>>;

/// Result of a push that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Content verified and committed; carries the relay decision
    Stored(RelayDecision),

    /// The stream ended before `length` bytes; resume from `offset`
    Incomplete { offset: u64 },
}

impl PushOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, PushOutcome::Stored(_))
    }
}

/// Ingestion state of a message id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Absent,
    Receiving { offset: u64 },
    Committing,
    Stored,
}

/// Stored content streamed from the requested offset, plus its metadata
pub struct PullResponse {
    pub meta: Message,
    pub offset: u64,
    pub content: PullStream,
}

impl PullResponse {
    /// Drain the content stream into memory
    pub async fn collect(self) -> TransferResult<(Message, Vec<u8>)> {
        let mut data = Vec::with_capacity(self.meta.length.saturating_sub(self.offset) as usize);
        let mut content = self.content;
        while let Some(chunk) = content.try_next().await? {
            data.extend_from_slice(&chunk);
        }
        Ok((self.meta, data))
    }
}

impl std::fmt::Debug for PullResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullResponse")
            .field("meta", &self.meta)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}
