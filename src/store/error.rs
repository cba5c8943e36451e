use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Message already stored: {0}")]
    AlreadySeen(String),

    #[error("Different message already stored under id {0}")]
    MessageIdCollision(String),

    #[error("Offset mismatch for {id}: stored {stored}, requested {requested}")]
    OffsetMismatch {
        id: String,
        stored: u64,
        requested: u64,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
