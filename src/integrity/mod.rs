pub mod content;
pub mod error;
pub mod identity;
pub mod verifier;

pub use content::{calculate_digest, ContentVerifier};
pub use error::{VerifyError, VerifyResult};
pub use identity::{Ed25519Identity, IdentityService, Validity};
pub use verifier::{MessageVerifier, VerifierConfig};
