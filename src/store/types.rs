use crate::message::Message;
use serde::{Deserialize, Serialize};

/// A message whose content has been received up to `received` bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialRecord {
    /// Metadata presented by the first accepted push
    pub message: Message,
    pub received: u64,
    pub updated_at: i64,
}

impl PartialRecord {
    pub fn remaining(&self) -> u64 {
        self.message.length.saturating_sub(self.received)
    }

    pub fn progress_percent(&self) -> f32 {
        if self.message.length == 0 {
            return 100.0;
        }
        (self.received as f32 / self.message.length as f32) * 100.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub messages: u64,
    pub content_bytes: u64,
    pub partials: u64,
    pub partial_bytes: u64,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Store: {} messages ({:.2}MB), {} partial ({:.2}MB)",
            self.messages,
            self.content_bytes as f64 / 1024.0 / 1024.0,
            self.partials,
            self.partial_bytes as f64 / 1024.0 / 1024.0
        )
    }
}
