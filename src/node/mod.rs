//! Node facade tying storage, sync, transfer and relay together

pub mod capability;
pub mod error;
pub mod node;
pub mod types;

pub use capability::{MessageNode, RelayService, StoreService};
pub use error::{NodeError, NodeResult};
pub use node::{Node, NodeBuilder};
pub use types::MaintenanceReport;
