//! Resumable, verified transfer of message content
//!
//! Push appends streamed bytes durably under a per-id lease and commits only
//! after the full verification and admission pipeline accepts the message.
//! Pull streams stored content from any offset without taking a lease.

pub mod error;
pub mod lease;
pub mod manager;
pub mod retry;
pub mod types;

pub use error::{ErrorClass, TransferError, TransferResult};
pub use lease::{LeaseGuard, LeaseInfo, LeaseTable};
pub use manager::TransferManager;
pub use retry::{with_backoff, with_backoff_config};
pub use types::{ContentStream, PullResponse, PullStream, PushOutcome, TransferState};
