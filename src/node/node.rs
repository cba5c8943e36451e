use crate::config::NodeConfig;
use crate::integrity::{Ed25519Identity, IdentityService, MessageVerifier};
use crate::message::Message;
use crate::node::capability::{RelayService, StoreService};
use crate::node::error::NodeResult;
use crate::node::types::MaintenanceReport;
use crate::relay::{AdmissionLimiter, RelayEvent, RelayScheduler, RoutingTable, StaticRoutes};
use crate::store::{MessageStore, StoreStats};
use crate::sync::{DiffStream, IdBatches, SyncEngine};
use crate::transfer::{
    ContentStream, PullResponse, PushOutcome, TransferError, TransferManager, TransferResult,
    TransferState,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for [`Node`]; unset collaborators fall back to in-process defaults
pub struct NodeBuilder {
    config: NodeConfig,
    identity: Option<Arc<dyn IdentityService>>,
    routes: Option<Arc<dyn RoutingTable>>,
    event_tx: Option<mpsc::Sender<RelayEvent>>,
    store: Option<Arc<MessageStore>>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            identity: None,
            routes: None,
            event_tx: None,
            store: None,
        }
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn routes(mut self, routes: Arc<dyn RoutingTable>) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Create with an event channel for monitoring
    pub fn events(mut self, tx: mpsc::Sender<RelayEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Use an already opened store instead of `config.database_url`
    pub fn store(mut self, store: Arc<MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> NodeResult<Node> {
        self.config.validate()?;
        crate::metrics::init_metrics();

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(MessageStore::new(&self.config.database_url).await?),
        };
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(Ed25519Identity::new()));
        let routes = self
            .routes
            .unwrap_or_else(|| Arc::new(StaticRoutes::new()));

        let limiter = Arc::new(AdmissionLimiter::new(&self.config.rate_limit));
        let mut scheduler = RelayScheduler::new(
            self.config.node_id.clone(),
            self.config.local_recipients.iter().cloned(),
            routes,
            Arc::clone(&limiter),
        );
        if let Some(tx) = self.event_tx {
            scheduler = scheduler.with_events(tx);
        }
        let scheduler = Arc::new(scheduler);

        let verifier = Arc::new(MessageVerifier::new(
            self.config.verifier_config(),
            identity,
        ));
        let transfers = TransferManager::new(
            Arc::clone(&store),
            verifier,
            Arc::clone(&limiter),
            Arc::clone(&scheduler),
            self.config.lease_idle_timeout,
            self.config.pull_chunk_size,
        );
        let sync = SyncEngine::new(Arc::clone(&store), self.config.max_diff_batch);

        info!(node_id = %self.config.node_id, "relay node ready");

        Ok(Node {
            config: self.config,
            store,
            transfers,
            sync,
            limiter,
            scheduler,
        })
    }
}

/// A relay node: local store plus the Diff, Push and Pull surfaces
pub struct Node {
    config: NodeConfig,
    store: Arc<MessageStore>,
    transfers: TransferManager,
    sync: SyncEngine,
    limiter: Arc<AdmissionLimiter>,
    scheduler: Arc<RelayScheduler>,
}

impl Node {
    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn transfers(&self) -> &TransferManager {
        &self.transfers
    }

    /// Admit a message created on this node
    pub async fn originate(&self, meta: Message, content: &[u8]) -> TransferResult<PushOutcome> {
        self.transfers.ingest(&meta, content).await
    }

    /// Remove a message and any partial content for it
    pub async fn delete(&self, id: &str) -> TransferResult<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!(id, "message deleted");
        }
        Ok(deleted)
    }

    /// Ids this node would offer in a Diff
    pub async fn local_ids(&self) -> TransferResult<Vec<String>> {
        Ok(self.store.ids(Utc::now()).await?)
    }

    pub async fn state(&self, id: &str) -> TransferResult<TransferState> {
        self.transfers.state(id).await
    }

    pub async fn stats(&self) -> TransferResult<StoreStats> {
        Ok(self.store.stats().await?)
    }

    /// Ids held here that `remote` lacks.
    ///
    /// Each batch is sent only after the previous one has been answered.
    pub async fn missing_on(
        &self,
        remote: &dyn RelayService,
        batch_size: usize,
    ) -> TransferResult<Vec<String>> {
        let ids = self.local_ids().await?;
        let (tx, rx) = futures::channel::mpsc::unbounded::<Vec<String>>();
        let mut answers = remote.diff(rx.boxed());

        let mut missing = Vec::new();
        for batch in SyncEngine::batches(ids, batch_size) {
            tx.unbounded_send(batch.clone())
                .map_err(|_| TransferError::Interrupted("diff request stream closed".into()))?;
            let answer = answers
                .next()
                .await
                .ok_or_else(|| TransferError::Interrupted("diff answers ended early".into()))??;
            missing.extend(SyncEngine::missing(&batch, &answer)?);
        }
        drop(tx);

        debug!(count = missing.len(), "diff complete");
        Ok(missing)
    }

    /// Forward a stored message to `remote`, resuming where it left off
    pub async fn push_to(&self, remote: &dyn RelayService, id: &str) -> TransferResult<PushOutcome> {
        let meta = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| TransferError::NotFound(id.to_string()))?;
        if meta.is_expired_at(Utc::now()) {
            return Err(TransferError::Expired(id.to_string()));
        }

        let outbound = self.scheduler.outbound(&meta);
        let offset = remote.resume_offset(&outbound).await?;
        let response = self.transfers.pull(id, offset).await?;
        debug!(id, offset, length = meta.length, "pushing to peer");

        remote
            .push(self.node_id(), outbound, offset, into_content(response))
            .await
    }

    /// Fetch `id` from `remote` (identified as `peer`) into the local store
    pub async fn pull_from(
        &self,
        peer: &str,
        remote: &dyn StoreService,
        id: &str,
    ) -> TransferResult<PushOutcome> {
        // Content streams are lazy, so fetching metadata reads nothing
        let first = remote.pull(id, 0).await?;
        let offset = self.transfers.resume_offset(&first.meta).await?;
        let response = if offset == 0 {
            first
        } else {
            drop(first);
            remote.pull(id, offset).await?
        };
        debug!(id, peer, offset, "pulling from peer");

        let meta = response.meta.clone();
        self.transfers
            .push(peer, meta, offset, into_content(response))
            .await
    }

    /// Reap idle leases, purge expired messages and refresh usage gauges
    pub async fn maintenance_cycle(&self) -> TransferResult<MaintenanceReport> {
        let reaped_leases = self.transfers.leases().reap_idle();
        let expired = self.store.purge_expired(Utc::now()).await?;

        for id in &expired {
            self.scheduler
                .emit_event(RelayEvent::Expired { id: id.clone() })
                .await;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "purged expired messages");
            crate::metrics::record_messages_expired(expired.len());
        }

        self.limiter.shrink();
        crate::metrics::set_store_usage(&self.store.stats().await?);

        Ok(MaintenanceReport {
            reaped_leases,
            expired,
        })
    }

    /// Run [`Node::maintenance_cycle`] every `sweep_interval` until the node is dropped
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(node) = node.upgrade() else {
                    break;
                };
                if let Err(e) = node.maintenance_cycle().await {
                    warn!(error = %e, "maintenance cycle failed");
                }
            }
            debug!("maintenance task stopped");
        })
    }
}

fn into_content(response: PullResponse) -> ContentStream {
    response.content.map_err(io::Error::other).boxed()
}

#[async_trait]
impl RelayService for Node {
    fn diff(&self, batches: IdBatches) -> DiffStream {
        self.sync.diff(batches)
    }

    async fn push(
        &self,
        peer: &str,
        meta: Message,
        offset: u64,
        content: ContentStream,
    ) -> TransferResult<PushOutcome> {
        self.transfers.push(peer, meta, offset, content).await
    }

    async fn resume_offset(&self, meta: &Message) -> TransferResult<u64> {
        self.transfers.resume_offset(meta).await
    }
}

#[async_trait]
impl StoreService for Node {
    async fn pull(&self, id: &str, offset: u64) -> TransferResult<PullResponse> {
        self.transfers.pull(id, offset).await
    }

    fn manifest(&self) -> BoxStream<'_, TransferResult<Message>> {
        self.store
            .manifest(Utc::now())
            .map_err(TransferError::from)
            .boxed()
    }
}
