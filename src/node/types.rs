use serde::{Deserialize, Serialize};

/// What one maintenance pass cleaned up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Ids whose idle transfer lease was released
    pub reaped_leases: Vec<String>,

    /// Ids of messages purged after expiry
    pub expired: Vec<String>,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.reaped_leases.is_empty() && self.expired.is_empty()
    }
}
