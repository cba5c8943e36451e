//! Metric recorders for relay operations

use crate::store::StoreStats;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Transfer counters
    describe_counter!(
        "relaysync_pushes_total",
        "Push requests handled, labelled by outcome"
    );
    describe_counter!(
        "relaysync_bytes_received_total",
        "Content bytes durably appended by pushes"
    );
    describe_counter!("relaysync_pulls_total", "Pull requests served");
    describe_counter!(
        "relaysync_bytes_served_total",
        "Content bytes streamed to pulling peers"
    );

    // Sync & relay counters
    describe_counter!(
        "relaysync_diff_batches_total",
        "Diff batches answered"
    );
    describe_counter!(
        "relaysync_diff_ids_total",
        "Message ids looked up while answering diffs"
    );
    describe_counter!(
        "relaysync_relay_decisions_total",
        "Post-commit relay decisions, labelled by decision"
    );
    describe_counter!(
        "relaysync_messages_expired_total",
        "Messages purged after their lifespan elapsed"
    );

    // Gauges
    describe_gauge!("relaysync_active_leases", "Transfer leases currently held");
    describe_gauge!("relaysync_stored_messages", "Messages in the local store");
    describe_gauge!(
        "relaysync_stored_bytes",
        "Content bytes in the local store, including partial uploads"
    );

    // Histograms
    describe_histogram!(
        "relaysync_push_duration_seconds",
        "Time from push request to outcome"
    );
}

// ============== Transfer Operations ==============

/// Record a push finishing with `outcome` ("stored", "incomplete" or an error label)
pub fn record_push(outcome: &str, duration: Duration) {
    counter!("relaysync_pushes_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("relaysync_push_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_bytes_received(bytes: usize) {
    counter!("relaysync_bytes_received_total").increment(bytes as u64);
}

pub fn record_pull() {
    counter!("relaysync_pulls_total").increment(1);
}

pub fn record_bytes_served(bytes: usize) {
    counter!("relaysync_bytes_served_total").increment(bytes as u64);
}

// ============== Sync & Relay ==============

/// Record one answered diff batch of `size` ids
pub fn record_diff_batch(size: usize) {
    counter!("relaysync_diff_batches_total").increment(1);
    counter!("relaysync_diff_ids_total").increment(size as u64);
}

pub fn record_relay_decision(decision: &str) {
    counter!("relaysync_relay_decisions_total", "decision" => decision.to_string()).increment(1);
}

pub fn record_messages_expired(count: usize) {
    counter!("relaysync_messages_expired_total").increment(count as u64);
}

// ============== Gauges ==============

pub fn set_active_leases(count: usize) {
    gauge!("relaysync_active_leases").set(count as f64);
}

/// Update store usage gauges from a stats snapshot
pub fn set_store_usage(stats: &StoreStats) {
    gauge!("relaysync_stored_messages").set(stats.messages as f64);
    gauge!("relaysync_stored_bytes").set((stats.content_bytes + stats.partial_bytes) as f64);
}
