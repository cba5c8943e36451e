use crate::integrity::VerifyError;
use crate::relay::RateLimited;
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// How a caller should react to a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying the same request cannot succeed
    Permanent,
    /// Retry after the hinted delay
    Retryable,
    /// Nothing to do; the outcome the caller wanted already holds
    Benign,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Invalid signature for {id}: {reason}")]
    InvalidSignature { id: String, reason: String },

    #[error("Content mismatch for {id}: {reason}")]
    ContentMismatch { id: String, reason: String },

    #[error("Different message already stored under id {0}")]
    MessageIdCollision(String),

    #[error("Message too big: {length} bytes exceeds limit {max}")]
    TooBig { length: u64, max: u64 },

    #[error("Too many hops: {hops} exceeds limit {max}")]
    TooManyHops { hops: usize, max: usize },

    #[error("Hop history rewritten for {0}")]
    InvalidHops(String),

    #[error("Incorrect offset: expected {expected}, got {actual}")]
    IncorrectOffset { expected: u64, actual: u64 },

    #[error("Message expired: {0}")]
    Expired(String),

    #[error("No route to recipient {0}")]
    NoRoute(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Offset {offset} beyond content length {length}")]
    OffsetOutOfRange { offset: u64, length: u64 },

    #[error("Diff batch of {size} ids exceeds limit {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Transfer of {id} held by another peer, retry after {retry_after:?}")]
    Busy { id: String, retry_after: Duration },

    #[error("Rate limit exceeded for {key} ({limit}/min), retry after {retry_after:?}")]
    RateLimitExceeded {
        key: String,
        limit: u32,
        retry_after: Duration,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Transfer interrupted: {0}")]
    Interrupted(String),

    #[error("Message already stored: {0}")]
    AlreadySeen(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TransferError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::Busy { .. }
            | TransferError::RateLimitExceeded { .. }
            | TransferError::Interrupted(_) => ErrorClass::Retryable,
            TransferError::AlreadySeen(_) => ErrorClass::Benign,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Backoff hint carried by retryable errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransferError::Busy { retry_after, .. }
            | TransferError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short, stable name used as a metric label
    pub fn label(&self) -> &'static str {
        match self {
            TransferError::InvalidSignature { .. } => "invalid_signature",
            TransferError::ContentMismatch { .. } => "content_mismatch",
            TransferError::MessageIdCollision(_) => "id_collision",
            TransferError::TooBig { .. } => "too_big",
            TransferError::TooManyHops { .. } => "too_many_hops",
            TransferError::InvalidHops(_) => "invalid_hops",
            TransferError::IncorrectOffset { .. } => "incorrect_offset",
            TransferError::Expired(_) => "expired",
            TransferError::NoRoute(_) => "no_route",
            TransferError::NotFound(_) => "not_found",
            TransferError::OffsetOutOfRange { .. } => "offset_out_of_range",
            TransferError::BatchTooLarge { .. } => "batch_too_large",
            TransferError::Busy { .. } => "busy",
            TransferError::RateLimitExceeded { .. } => "rate_limited",
            TransferError::ProtocolViolation(_) => "protocol",
            TransferError::Interrupted(_) => "interrupted",
            TransferError::AlreadySeen(_) => "already_seen",
            TransferError::Storage(_) => "storage",
        }
    }
}

impl From<VerifyError> for TransferError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Expired(id) => TransferError::Expired(id),
            VerifyError::TooManyHops { hops, max } => TransferError::TooManyHops { hops, max },
            VerifyError::HopsRewritten(id) => TransferError::InvalidHops(id),
            VerifyError::TooBig { length, max } => TransferError::TooBig { length, max },
            VerifyError::InvalidSignature { id, reason } => {
                TransferError::InvalidSignature { id, reason }
            }
            VerifyError::ContentMismatch { id, reason } => {
                TransferError::ContentMismatch { id, reason }
            }
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TransferError::NotFound(id),
            StoreError::AlreadySeen(id) => TransferError::AlreadySeen(id),
            StoreError::MessageIdCollision(id) => TransferError::MessageIdCollision(id),
            StoreError::OffsetMismatch {
                stored, requested, ..
            } => TransferError::IncorrectOffset {
                expected: stored,
                actual: requested,
            },
            other => TransferError::Storage(other.to_string()),
        }
    }
}

impl From<RateLimited> for TransferError {
    fn from(err: RateLimited) -> Self {
        TransferError::RateLimitExceeded {
            key: err.key,
            limit: err.limit,
            retry_after: err.retry_after,
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
