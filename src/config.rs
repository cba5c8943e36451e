//! Node configuration

use crate::integrity::VerifierConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Token bucket settings for admission control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Pushes accepted from a single peer per minute
    pub per_peer_per_minute: u32,

    /// Messages admitted or relayed for a single recipient per minute
    pub per_recipient_per_minute: u32,

    /// Extra requests allowed in a burst above the steady rate
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_peer_per_minute: 600,
            per_recipient_per_minute: 120,
            burst: 20,
        }
    }
}

impl RateLimitConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Configuration for a relay node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identifier this node appends to `hops` when forwarding
    pub node_id: String,

    /// SQLite URL of the message store
    pub database_url: String,

    pub max_hops: usize,

    pub max_message_size: u64,

    /// A transfer lease without progress for this long is released
    pub lease_idle_timeout: Duration,

    /// How often the maintenance task reaps leases and purges expired messages
    pub sweep_interval: Duration,

    /// Largest number of ids accepted in one diff batch
    pub max_diff_batch: usize,

    /// Size of content chunks streamed by pull
    pub pull_chunk_size: usize,

    pub rate_limit: RateLimitConfig,

    /// Recipients delivered at this node instead of forwarded
    pub local_recipients: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            database_url: "sqlite://relaysync.db".to_string(),
            max_hops: 32,
            max_message_size: 16 * 1024 * 1024, // 16MB
            lease_idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            max_diff_batch: 1024,
            pull_chunk_size: 64 * 1024,
            rate_limit: RateLimitConfig::default(),
            local_recipients: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be positive".into()));
        }
        if self.max_diff_batch == 0 {
            return Err(ConfigError::Invalid("max_diff_batch must be positive".into()));
        }
        if self.pull_chunk_size == 0 {
            return Err(ConfigError::Invalid("pull_chunk_size must be positive".into()));
        }
        if self.lease_idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("lease_idle_timeout must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep_interval must be positive".into()));
        }
        let limits = &self.rate_limit;
        if limits.enabled && (limits.per_peer_per_minute == 0 || limits.per_recipient_per_minute == 0)
        {
            return Err(ConfigError::Invalid(
                "rate limits must be positive when enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            max_hops: self.max_hops,
            max_message_size: self.max_message_size,
        }
    }
}
