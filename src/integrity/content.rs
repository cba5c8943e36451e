use crate::integrity::error::{VerifyError, VerifyResult};
use crate::message::Message;
use sha2::{Digest, Sha256};

/// Calculate the SHA-256 digest of a byte slice
pub fn calculate_digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Incremental content check, fed as bytes stream in.
///
/// Rejects as soon as the stream runs past the declared length, so an
/// oversized upload never reaches storage.
#[derive(Clone)]
pub struct ContentVerifier {
    id: String,
    expected_length: u64,
    expected_digest: [u8; 32],
    hasher: Sha256,
    received: u64,
}

impl ContentVerifier {
    pub fn new(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            expected_length: message.length,
            expected_digest: message.sha256,
            hasher: Sha256::new(),
            received: 0,
        }
    }

    /// Feed the next contiguous slice of content
    pub fn update(&mut self, data: &[u8]) -> VerifyResult<()> {
        let total = self.received + data.len() as u64;
        if total > self.expected_length {
            return Err(VerifyError::ContentMismatch {
                id: self.id.clone(),
                reason: format!(
                    "received {} bytes, declared length is {}",
                    total, self.expected_length
                ),
            });
        }
        self.hasher.update(data);
        self.received = total;
        Ok(())
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.expected_length
    }

    /// Check total length and digest of everything fed so far
    pub fn finish(&self) -> VerifyResult<()> {
        if self.received != self.expected_length {
            return Err(VerifyError::ContentMismatch {
                id: self.id.clone(),
                reason: format!(
                    "received {} bytes, declared length is {}",
                    self.received, self.expected_length
                ),
            });
        }

        let actual: [u8; 32] = self.hasher.clone().finalize().into();
        if actual != self.expected_digest {
            return Err(VerifyError::ContentMismatch {
                id: self.id.clone(),
                reason: format!(
                    "sha256 {} does not match declared {}",
                    hex::encode(actual),
                    hex::encode(self.expected_digest)
                ),
            });
        }
        Ok(())
    }
}
