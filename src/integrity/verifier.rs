use crate::integrity::content::ContentVerifier;
use crate::integrity::error::{VerifyError, VerifyResult};
use crate::integrity::identity::{IdentityService, Validity};
use crate::message::Message;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Policy limits applied by the verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierConfig {
    pub max_hops: usize,
    pub max_message_size: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_hops: 32,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Stateless admission pipeline.
///
/// Checks run in a fixed order and stop at the first failure: expiry, hops,
/// size, credentials, signature, content.
pub struct MessageVerifier {
    config: VerifierConfig,
    identity: Arc<dyn IdentityService>,
}

impl MessageVerifier {
    pub fn new(config: VerifierConfig, identity: Arc<dyn IdentityService>) -> Self {
        Self { config, identity }
    }

    pub fn config(&self) -> VerifierConfig {
        self.config
    }

    pub fn check_expiry(&self, message: &Message, now: DateTime<Utc>) -> VerifyResult<()> {
        if message.is_expired_at(now) {
            return Err(VerifyError::Expired(message.id.clone()));
        }
        Ok(())
    }

    /// Enforce the hop limit and that `message.hops` extends `prior`, the
    /// hop list previously observed for the same id.
    pub fn check_hops(&self, message: &Message, prior: Option<&[String]>) -> VerifyResult<()> {
        if message.hops.len() > self.config.max_hops {
            return Err(VerifyError::TooManyHops {
                hops: message.hops.len(),
                max: self.config.max_hops,
            });
        }
        if let Some(prior) = prior {
            if !message.hops.starts_with(prior) {
                return Err(VerifyError::HopsRewritten(message.id.clone()));
            }
        }
        Ok(())
    }

    pub fn check_size(&self, message: &Message) -> VerifyResult<()> {
        if message.length > self.config.max_message_size {
            return Err(VerifyError::TooBig {
                length: message.length,
                max: self.config.max_message_size,
            });
        }
        Ok(())
    }

    pub fn check_credentials(&self, message: &Message, now: DateTime<Utc>) -> VerifyResult<()> {
        match self.identity.validate_blessings(
            &message.sender_blessings,
            &message.sender_discharges,
            now,
        ) {
            Validity::Valid => Ok(()),
            Validity::Invalid(reason) => Err(VerifyError::InvalidSignature {
                id: message.id.clone(),
                reason: format!("credentials rejected: {}", reason),
            }),
        }
    }

    pub fn check_signature(&self, message: &Message) -> VerifyResult<()> {
        let payload = message.signing_payload();
        if !self
            .identity
            .verify_signature(&message.sender_blessings, &payload, &message.signature)
        {
            return Err(VerifyError::InvalidSignature {
                id: message.id.clone(),
                reason: "signature does not cover message fields".into(),
            });
        }
        Ok(())
    }

    /// Every metadata check, i.e. the pipeline without the content step
    pub fn verify_metadata(
        &self,
        message: &Message,
        prior_hops: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> VerifyResult<()> {
        self.check_expiry(message, now)?;
        self.check_hops(message, prior_hops)?;
        self.check_size(message)?;
        self.check_credentials(message, now)?;
        self.check_signature(message)
    }

    /// Full pipeline over metadata and the accumulated content
    pub fn verify(
        &self,
        message: &Message,
        prior_hops: Option<&[String]>,
        content: &ContentVerifier,
        now: DateTime<Utc>,
    ) -> VerifyResult<()> {
        self.verify_metadata(message, prior_hops, now)?;
        content.finish()
    }

    /// Full pipeline over metadata and an in-memory body
    pub fn verify_bytes(
        &self,
        message: &Message,
        content: &[u8],
        now: DateTime<Utc>,
    ) -> VerifyResult<()> {
        self.verify_metadata(message, None, now)?;
        let mut check = ContentVerifier::new(message);
        check.update(content)?;
        check.finish()
    }
}
