//! Anti-entropy negotiation of missing message ids
//!
//! The initiator streams batches of ids; the responder answers each batch
//! with one flag per id, in order, before reading the next batch.

pub mod engine;

pub use engine::{DiffStream, IdBatches, SyncEngine};
