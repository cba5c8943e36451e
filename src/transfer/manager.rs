use crate::integrity::{ContentVerifier, MessageVerifier};
use crate::message::Message;
use crate::relay::{AdmissionLimiter, RelayScheduler};
use crate::store::{MessageStore, PartialRecord};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::lease::{LeaseGuard, LeaseTable};
use crate::transfer::types::{ContentStream, PullResponse, PushOutcome, TransferState};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on the retry hint given to a pusher refused with `Busy`
const MAX_BUSY_HINT: Duration = Duration::from_secs(1);

/// Resumable ingress and egress of message content.
///
/// Pushes for one id are serialized by a lease; pulls, resume queries and
/// pushes for other ids never wait on it.
#[derive(Clone)]
pub struct TransferManager {
    store: Arc<MessageStore>,
    verifier: Arc<MessageVerifier>,
    limiter: Arc<AdmissionLimiter>,
    scheduler: Arc<RelayScheduler>,
    leases: Arc<LeaseTable>,
    pull_chunk_size: usize,
}

impl TransferManager {
    pub fn new(
        store: Arc<MessageStore>,
        verifier: Arc<MessageVerifier>,
        limiter: Arc<AdmissionLimiter>,
        scheduler: Arc<RelayScheduler>,
        lease_idle_timeout: Duration,
        pull_chunk_size: usize,
    ) -> Self {
        Self {
            store,
            verifier,
            limiter,
            scheduler,
            leases: Arc::new(LeaseTable::new(lease_idle_timeout)),
            pull_chunk_size: pull_chunk_size.max(1),
        }
    }

    pub fn leases(&self) -> &Arc<LeaseTable> {
        &self.leases
    }

    pub fn scheduler(&self) -> &Arc<RelayScheduler> {
        &self.scheduler
    }

    /// Receive content for `meta` from `peer`, starting at `offset`.
    ///
    /// Bytes are appended durably as they arrive. When the stream ends early
    /// the durable offset is returned so the peer can resume; when it
    /// completes the message is verified, admitted and committed.
    pub async fn push(
        &self,
        peer: &str,
        meta: Message,
        offset: u64,
        content: ContentStream,
    ) -> TransferResult<PushOutcome> {
        let start = Instant::now();
        let result = self.push_inner(peer, &meta, offset, content).await;

        let outcome = match &result {
            Ok(PushOutcome::Stored(_)) => "stored",
            Ok(PushOutcome::Incomplete { .. }) => "incomplete",
            Err(e) => e.label(),
        };
        crate::metrics::record_push(outcome, start.elapsed());

        result
    }

    async fn push_inner(
        &self,
        peer: &str,
        meta: &Message,
        offset: u64,
        content: ContentStream,
    ) -> TransferResult<PushOutcome> {
        self.verifier.check_expiry(meta, Utc::now())?;

        // Already committed: same content is a no-op, anything else collides
        if let Some(stored) = self.store.get(&meta.id).await? {
            return Err(duplicate_of(&stored, meta));
        }

        let lease = self
            .leases
            .acquire(&meta.id, peer, offset)
            .map_err(|retry_after| {
                debug!(id = %meta.id, peer, ?retry_after, "push refused, lease held");
                TransferError::Busy {
                    id: meta.id.clone(),
                    retry_after: retry_after.min(MAX_BUSY_HINT),
                }
            })?;

        let partial = self.store.partial(&meta.id).await?;
        let expected = partial.as_ref().map(|p| p.received).unwrap_or(0);
        if offset != expected {
            debug!(id = %meta.id, peer, expected, offset, "push at wrong offset");
            return Err(TransferError::IncorrectOffset {
                expected,
                actual: offset,
            });
        }

        // A different upload already owns this id's partial bytes
        if let Some(ref record) = partial {
            if record.message.sha256 != meta.sha256 || record.message.length != meta.length {
                return Err(TransferError::MessageIdCollision(meta.id.clone()));
            }
        }

        match self.receive(peer, meta, partial, &lease, content).await {
            Ok(Received::Committed) => {
                drop(lease);
                let decision = self.scheduler.schedule(meta).await;
                Ok(PushOutcome::Stored(decision))
            }
            Ok(Received::Partial { offset }) => Ok(PushOutcome::Incomplete { offset }),
            Err(e) => {
                if !e.is_retryable() && lease.is_held() {
                    if let Err(discard) = self.store.discard_partial(&meta.id).await {
                        warn!(id = %meta.id, error = %discard, "failed to discard partial content");
                    }
                    info!(id = %meta.id, peer, error = %e, "push rejected, partial content discarded");
                } else {
                    debug!(id = %meta.id, peer, error = %e, "push stopped, partial content kept");
                }
                Err(e)
            }
        }
    }

    /// Append streamed content under `lease`, then verify and commit
    async fn receive(
        &self,
        peer: &str,
        meta: &Message,
        partial: Option<PartialRecord>,
        lease: &LeaseGuard,
        mut content: ContentStream,
    ) -> TransferResult<Received> {
        let prior_hops = partial.as_ref().map(|p| p.message.hops.clone());
        self.verifier
            .verify_metadata(meta, prior_hops.as_deref(), Utc::now())?;

        self.store.begin_partial(meta).await?;

        // Rebuild the running digest from bytes already on disk
        let mut check = ContentVerifier::new(meta);
        let mut received = 0;
        if partial.is_some() {
            let existing = self.store.read_partial(&meta.id).await?;
            check.update(&existing)?;
            received = existing.len() as u64;
        }

        while let Some(next) = content.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(id = %meta.id, peer, offset = received, error = %e, "push stream failed");
                    return Err(TransferError::Interrupted(e.to_string()));
                }
            };
            if chunk.is_empty() {
                continue;
            }

            check.update(&chunk)?;

            if !lease.is_held() {
                return Err(TransferError::Interrupted(format!(
                    "lease for {} lapsed at offset {}",
                    meta.id, received
                )));
            }
            received = self.store.append_partial(&meta.id, received, &chunk).await?;
            lease.advance(received);
            crate::metrics::record_bytes_received(chunk.len());
        }

        if !check.is_complete() {
            debug!(id = %meta.id, peer, offset = received, "push ended early");
            return Ok(Received::Partial { offset: received });
        }

        lease.mark_committing();
        self.verifier
            .verify(meta, prior_hops.as_deref(), &check, Utc::now())?;

        self.limiter.check_push(peer, &meta.recipient)?;

        self.store.commit_partial(meta).await?;
        info!(id = %meta.id, peer, length = meta.length, hops = meta.hop_count(), "message stored");

        Ok(Received::Committed)
    }

    /// Verify and commit a message whose content is already in memory, such
    /// as one originated on this node
    pub async fn ingest(&self, meta: &Message, content: &[u8]) -> TransferResult<PushOutcome> {
        let now = Utc::now();
        self.verifier.verify_bytes(meta, content, now)?;

        let lease = self
            .leases
            .acquire(&meta.id, self.scheduler.node_id(), 0)
            .map_err(|retry_after| TransferError::Busy {
                id: meta.id.clone(),
                retry_after: retry_after.min(MAX_BUSY_HINT),
            })?;
        self.store.put(meta, content).await?;
        drop(lease);

        info!(id = %meta.id, length = meta.length, "message ingested");
        Ok(PushOutcome::Stored(self.scheduler.schedule(meta).await))
    }

    /// Stream stored content of `id` from `offset` to the end
    pub async fn pull(&self, id: &str, offset: u64) -> TransferResult<PullResponse> {
        let meta = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| TransferError::NotFound(id.to_string()))?;

        if meta.is_expired_at(Utc::now()) {
            return Err(TransferError::Expired(id.to_string()));
        }
        if offset > meta.length {
            return Err(TransferError::OffsetOutOfRange {
                offset,
                length: meta.length,
            });
        }

        crate::metrics::record_pull();
        debug!(id, offset, length = meta.length, "serving pull");

        let cursor = PullCursor {
            store: Arc::clone(&self.store),
            id: id.to_string(),
            position: offset,
            length: meta.length,
            chunk_size: self.pull_chunk_size as u64,
            failed: false,
        };

        let content = stream::unfold(cursor, |mut cursor| async move {
            if cursor.failed || cursor.position >= cursor.length {
                return None;
            }
            let len = cursor.chunk_size.min(cursor.length - cursor.position);
            let item = match cursor
                .store
                .read_content(&cursor.id, cursor.position, len)
                .await
            {
                Ok(data) if data.len() as u64 == len => {
                    cursor.position += len;
                    crate::metrics::record_bytes_served(data.len());
                    Ok(Bytes::from(data))
                }
                Ok(data) => {
                    cursor.failed = true;
                    Err(TransferError::Storage(format!(
                        "short read of {} at offset {}: {} of {} bytes",
                        cursor.id,
                        cursor.position,
                        data.len(),
                        len
                    )))
                }
                Err(e) => {
                    cursor.failed = true;
                    Err(e.into())
                }
            };
            Some((item, cursor))
        })
        .boxed();

        Ok(PullResponse {
            meta,
            offset,
            content,
        })
    }

    /// Durable byte count for `meta.id`; the full length once stored
    pub async fn resume_offset(&self, meta: &Message) -> TransferResult<u64> {
        if let Some(stored) = self.store.get(&meta.id).await? {
            return match duplicate_of(&stored, meta) {
                TransferError::AlreadySeen(_) => Ok(stored.length),
                collision => Err(collision),
            };
        }
        Ok(self.store.received_bytes(&meta.id).await?)
    }

    pub async fn state(&self, id: &str) -> TransferResult<TransferState> {
        if self.store.get(id).await?.is_some() {
            return Ok(TransferState::Stored);
        }
        if let Some(lease) = self.leases.info(id) {
            if lease.committing {
                return Ok(TransferState::Committing);
            }
        }
        match self.store.partial(id).await? {
            Some(record) => Ok(TransferState::Receiving {
                offset: record.received,
            }),
            None => Ok(TransferState::Absent),
        }
    }
}

enum Received {
    Committed,
    Partial { offset: u64 },
}

struct PullCursor {
    store: Arc<MessageStore>,
    id: String,
    position: u64,
    length: u64,
    chunk_size: u64,
    failed: bool,
}

fn duplicate_of(stored: &Message, incoming: &Message) -> TransferError {
    if stored.sha256 == incoming.sha256 && stored.length == incoming.length {
        TransferError::AlreadySeen(incoming.id.clone())
    } else {
        TransferError::MessageIdCollision(incoming.id.clone())
    }
}
