use crate::store::MessageStore;
use crate::transfer::{TransferError, TransferResult};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Batches of ids sent by a Diff initiator
pub type IdBatches = BoxStream<'static, Vec<String>>;

/// One answer per batch: `true` where the responder holds the message
pub type DiffStream = BoxStream<'static, TransferResult<Vec<bool>>>;

/// Diff responder over the local store
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<MessageStore>,
    max_batch: usize,
    parallelism: usize,
}

struct DiffState {
    engine: SyncEngine,
    batches: IdBatches,
    failed: bool,
}

impl SyncEngine {
    pub fn new(store: Arc<MessageStore>, max_batch: usize) -> Self {
        Self {
            store,
            max_batch: max_batch.max(1),
            parallelism: num_cpus::get().max(1),
        }
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Answer each incoming batch in order.
    ///
    /// Batch *i+1* is not read until the answer to batch *i* has been taken
    /// from the returned stream. The stream ends after the first error.
    pub fn diff(&self, batches: IdBatches) -> DiffStream {
        let state = DiffState {
            engine: self.clone(),
            batches,
            failed: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.failed {
                return None;
            }
            let batch = state.batches.next().await?;
            let answer = state.engine.answer(batch).await;
            if let Err(ref e) = answer {
                warn!(error = %e, "diff aborted");
                state.failed = true;
            }
            Some((answer, state))
        })
        .boxed()
    }

    /// Flags for one batch, in request order.
    ///
    /// Lookups run concurrently; `buffered` keeps their output ordered.
    pub async fn answer(&self, batch: Vec<String>) -> TransferResult<Vec<bool>> {
        if batch.len() > self.max_batch {
            return Err(TransferError::BatchTooLarge {
                size: batch.len(),
                max: self.max_batch,
            });
        }

        let now = Utc::now();
        let size = batch.len();
        let answers: Vec<bool> = stream::iter(batch)
            .map(|id| {
                let store = Arc::clone(&self.store);
                async move { store.has_content(&id, now).await }
            })
            .buffered(self.parallelism)
            .try_collect()
            .await?;

        let held = answers.iter().filter(|held| **held).count();
        debug!(size, held, "diff batch answered");
        crate::metrics::record_diff_batch(size);

        Ok(answers)
    }

    /// Split `ids` into request batches of at most `size`
    pub fn batches(ids: Vec<String>, size: usize) -> Vec<Vec<String>> {
        ids.chunks(size.max(1)).map(|chunk| chunk.to_vec()).collect()
    }

    /// Ids of `batch` the responder reported as not held
    pub fn missing(batch: &[String], answers: &[bool]) -> TransferResult<Vec<String>> {
        if batch.len() != answers.len() {
            return Err(TransferError::ProtocolViolation(format!(
                "diff answered {} flags for {} ids",
                answers.len(),
                batch.len()
            )));
        }
        Ok(batch
            .iter()
            .zip(answers)
            .filter(|(_, held)| !**held)
            .map(|(id, _)| id.clone())
            .collect())
    }
}
