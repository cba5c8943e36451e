//! Store-and-forward message relay engine.
//!
//! Peers exchange messages without an end-to-end path: a message hops
//! opportunistically through intermediate nodes until it reaches its
//! recipient. This crate implements the synchronization core:
//!
//! - anti-entropy negotiation of missing message ids ([`sync`])
//! - resumable chunked ingress and egress of content ([`transfer`])
//! - the verification and admission pipeline ([`integrity`], [`relay`])
//! - durable, deduplicating message storage ([`store`])

pub mod config;
pub mod integrity;
pub mod message;
pub mod metrics;
pub mod node;
pub mod relay;
pub mod store;
pub mod sync;
pub mod transfer;

pub use config::{ConfigError, NodeConfig, RateLimitConfig};
pub use message::{Blessings, Discharge, Message};
pub use node::{MessageNode, Node, NodeBuilder, NodeError, RelayService, StoreService};
pub use relay::{RelayDecision, RelayEvent, RoutingTable, StaticRoutes};
pub use transfer::{ErrorClass, PushOutcome, TransferError, TransferResult};
