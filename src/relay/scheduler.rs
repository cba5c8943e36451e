//! Post-ingestion forwarding decisions

use crate::message::Message;
use crate::relay::rate_limiter::AdmissionLimiter;
use crate::relay::routing::RoutingTable;
use crate::relay::types::{RelayDecision, RelayEvent};
use crate::transfer::{TransferError, TransferResult};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Decides whether a committed message is delivered here, forwarded, or held
pub struct RelayScheduler {
    node_id: String,
    local_recipients: HashSet<String>,
    routes: Arc<dyn RoutingTable>,
    limiter: Arc<AdmissionLimiter>,
    event_tx: Option<mpsc::Sender<RelayEvent>>,
}

impl RelayScheduler {
    pub fn new(
        node_id: impl Into<String>,
        local_recipients: impl IntoIterator<Item = String>,
        routes: Arc<dyn RoutingTable>,
        limiter: Arc<AdmissionLimiter>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            local_recipients: local_recipients.into_iter().collect(),
            routes,
            limiter,
            event_tx: None,
        }
    }

    /// Create with an event channel for monitoring
    pub fn with_events(mut self, tx: mpsc::Sender<RelayEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_local(&self, recipient: &str) -> bool {
        recipient == self.node_id || self.local_recipients.contains(recipient)
    }

    /// Next hops for `message`, skipping this node and peers it already visited
    pub fn next_hops_for(&self, message: &Message) -> TransferResult<Vec<String>> {
        let candidates = self
            .routes
            .next_hops(&message.recipient)
            .ok_or_else(|| TransferError::NoRoute(message.recipient.clone()))?;

        let targets: Vec<String> = candidates
            .into_iter()
            .filter(|peer| *peer != self.node_id && !message.hops.contains(peer))
            .collect();

        if targets.is_empty() {
            return Err(TransferError::NoRoute(message.recipient.clone()));
        }
        Ok(targets)
    }

    /// Decide what to do with a freshly committed message
    pub async fn schedule(&self, message: &Message) -> RelayDecision {
        self.emit_event(RelayEvent::Stored {
            id: message.id.clone(),
            length: message.length,
        })
        .await;

        let decision = self.decide(message);
        crate::metrics::record_relay_decision(decision.label());

        let event = match &decision {
            RelayDecision::Deliver => {
                info!(id = %message.id, recipient = %message.recipient, "message delivered");
                RelayEvent::Delivered {
                    id: message.id.clone(),
                    recipient: message.recipient.clone(),
                }
            }
            RelayDecision::Forward { targets, .. } => {
                debug!(id = %message.id, ?targets, "message scheduled for forwarding");
                RelayEvent::Forward {
                    id: message.id.clone(),
                    targets: targets.clone(),
                }
            }
            RelayDecision::Deferred { retry_after } => {
                debug!(id = %message.id, ?retry_after, "forwarding deferred");
                RelayEvent::Deferred {
                    id: message.id.clone(),
                    retry_after: *retry_after,
                }
            }
            RelayDecision::NoRoute => {
                info!(id = %message.id, recipient = %message.recipient, "no route, holding message");
                RelayEvent::NoRoute {
                    id: message.id.clone(),
                    recipient: message.recipient.clone(),
                }
            }
        };
        self.emit_event(event).await;

        decision
    }

    fn decide(&self, message: &Message) -> RelayDecision {
        if self.is_local(&message.recipient) {
            return RelayDecision::Deliver;
        }

        let targets = match self.next_hops_for(message) {
            Ok(targets) => targets,
            Err(_) => return RelayDecision::NoRoute,
        };

        if let Err(limited) = self.limiter.check_forward(&message.recipient) {
            return RelayDecision::Deferred {
                retry_after: limited.retry_after,
            };
        }

        RelayDecision::Forward {
            message: self.outbound(message),
            targets,
        }
    }

    /// Metadata as it leaves this node, with this node recorded as the last hop
    pub fn outbound(&self, message: &Message) -> Message {
        if message.hops.last().map(String::as_str) == Some(self.node_id.as_str()) {
            message.clone()
        } else {
            message.with_hop(&self.node_id)
        }
    }

    /// Emit an event if there's a listener
    pub async fn emit_event(&self, event: RelayEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}
