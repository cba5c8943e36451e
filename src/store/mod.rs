pub mod error;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::MessageStore;
pub use types::{PartialRecord, StoreStats};
