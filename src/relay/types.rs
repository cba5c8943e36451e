//! Relay decisions and events

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to a message after it has been committed locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayDecision {
    /// This node is the final recipient
    Deliver,

    /// Forward `message` (with this node appended to its hops) to `targets`
    Forward {
        message: Message,
        targets: Vec<String>,
    },

    /// Routes exist but the recipient's relay capacity is exhausted
    Deferred { retry_after: Duration },

    /// No known route; the message is retained but not forwarded
    NoRoute,
}

impl RelayDecision {
    pub fn label(&self) -> &'static str {
        match self {
            RelayDecision::Deliver => "deliver",
            RelayDecision::Forward { .. } => "forward",
            RelayDecision::Deferred { .. } => "deferred",
            RelayDecision::NoRoute => "no_route",
        }
    }

    pub fn targets(&self) -> &[String] {
        match self {
            RelayDecision::Forward { targets, .. } => targets,
            _ => &[],
        }
    }
}

/// Events emitted by the relay scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Message committed to the local store
    Stored { id: String, length: u64 },

    /// Message addressed to this node
    Delivered { id: String, recipient: String },

    /// Message scheduled for forwarding
    Forward { id: String, targets: Vec<String> },

    /// Forwarding postponed by the rate limiter
    Deferred { id: String, retry_after: Duration },

    /// No route to the recipient
    NoRoute { id: String, recipient: String },

    /// Message purged after expiry
    Expired { id: String },
}
