use thiserror::Error;

/// Reasons the verification pipeline rejects a message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Message expired: {0}")]
    Expired(String),

    #[error("Too many hops: {hops} exceeds limit {max}")]
    TooManyHops { hops: usize, max: usize },

    #[error("Hop history rewritten for {0}")]
    HopsRewritten(String),

    #[error("Message too big: {length} bytes exceeds limit {max}")]
    TooBig { length: u64, max: u64 },

    #[error("Invalid signature for {id}: {reason}")]
    InvalidSignature { id: String, reason: String },

    #[error("Content mismatch for {id}: {reason}")]
    ContentMismatch { id: String, reason: String },
}

pub type VerifyResult<T> = Result<T, VerifyError>;
