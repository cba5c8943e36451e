use crate::config::ConfigError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type NodeResult<T> = Result<T, NodeError>;
