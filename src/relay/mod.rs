//! Admission throttling and post-ingestion relay decisions
//!
//! After a message is committed, the scheduler decides whether this node is
//! the final recipient, a relay with known next hops, or a dead end. Dead-end
//! messages are retained for future routes but not actively forwarded.

pub mod rate_limiter;
pub mod routing;
pub mod scheduler;
pub mod types;

pub use rate_limiter::{AdmissionLimiter, RateLimited};
pub use routing::{RoutingTable, StaticRoutes};
pub use scheduler::RelayScheduler;
pub use types::{RelayDecision, RelayEvent};
