//! Metrics and observability module
//!
//! Records engine activity through the `metrics` facade. Installing a
//! recorder or exporter is left to the embedding process.
//!
//! Key metrics:
//! - Push outcomes and durations
//! - Bytes received and served
//! - Diff batches answered
//! - Relay decisions and expired purges
//! - Active leases and store usage

pub mod recorder;

pub use recorder::{
    init_metrics, record_bytes_received, record_bytes_served, record_diff_batch,
    record_messages_expired, record_pull, record_push, record_relay_decision, set_active_leases,
    set_store_usage,
};
