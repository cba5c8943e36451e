//! Identity collaborator boundary and an ed25519-backed implementation.

use crate::message::{Blessings, Discharge};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::RwLock;
use std::collections::HashSet;

/// Outcome of a credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(String),
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }
}

/// Validates sender credentials and signatures on behalf of the verifier
pub trait IdentityService: Send + Sync {
    fn validate_blessings(
        &self,
        blessings: &Blessings,
        discharges: &[Discharge],
        now: DateTime<Utc>,
    ) -> Validity;

    fn verify_signature(&self, blessings: &Blessings, payload: &[u8], signature: &[u8]) -> bool;
}

/// Identity service where blessings carry a raw ed25519 public key and each
/// discharge carries a big-endian i64 expiry in unix milliseconds.
#[derive(Default)]
pub struct Ed25519Identity {
    revoked: RwLock<HashSet<[u8; 32]>>,
}

impl Ed25519Identity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting credentials issued to `key`
    pub fn revoke(&self, key: &VerifyingKey) {
        self.revoked.write().insert(key.to_bytes());
    }

    /// Build a discharge valid until `expires_at`
    pub fn discharge_until(expires_at: DateTime<Utc>) -> Discharge {
        Discharge(expires_at.timestamp_millis().to_be_bytes().to_vec())
    }

    fn parse_key(blessings: &Blessings) -> Result<VerifyingKey, String> {
        let bytes: [u8; 32] = blessings
            .0
            .as_slice()
            .try_into()
            .map_err(|_| format!("expected 32-byte key, got {} bytes", blessings.0.len()))?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| e.to_string())
    }

    fn discharge_expiry(discharge: &Discharge) -> Option<DateTime<Utc>> {
        let bytes: [u8; 8] = discharge.0.as_slice().try_into().ok()?;
        Utc.timestamp_millis_opt(i64::from_be_bytes(bytes)).single()
    }
}

impl IdentityService for Ed25519Identity {
    fn validate_blessings(
        &self,
        blessings: &Blessings,
        discharges: &[Discharge],
        now: DateTime<Utc>,
    ) -> Validity {
        let key = match Self::parse_key(blessings) {
            Ok(key) => key,
            Err(reason) => return Validity::Invalid(reason),
        };
        if self.revoked.read().contains(&key.to_bytes()) {
            return Validity::Invalid("blessings revoked".into());
        }
        for discharge in discharges {
            match Self::discharge_expiry(discharge) {
                Some(expiry) if now <= expiry => {}
                Some(expiry) => {
                    return Validity::Invalid(format!("discharge expired at {}", expiry));
                }
                None => return Validity::Invalid("malformed discharge".into()),
            }
        }
        Validity::Valid
    }

    fn verify_signature(&self, blessings: &Blessings, payload: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = Self::parse_key(blessings) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(payload, &signature).is_ok()
    }
}
