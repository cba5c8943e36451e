pub mod signing;
pub mod types;
pub mod wire;

pub use signing::sign;
pub use types::{Blessings, Discharge, Message};
pub use wire::WireError;
