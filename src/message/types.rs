use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Domain tag mixed into every signing payload
const SIGNING_DOMAIN: &[u8] = b"relaysync/message/v1";

/// Opaque credential material identifying the sender
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Blessings(pub Vec<u8>);

/// Opaque proof that a third-party caveat on the sender's blessings holds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discharge(pub Vec<u8>);

/// Message metadata. Content is stored and transferred separately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Globally unique identifier, the join key for all per-message state
    pub id: String,

    /// Intended destination
    pub recipient: String,

    pub creation_time: DateTime<Utc>,

    pub lifespan: Duration,

    /// Exact content length in bytes
    pub length: u64,

    /// SHA-256 of the content
    pub sha256: [u8; 32],

    /// Relays the message passed through, oldest first
    pub hops: Vec<String>,

    pub sender_blessings: Blessings,

    pub sender_discharges: Vec<Discharge>,

    /// Signature over [`Message::signing_payload`]
    pub signature: Vec<u8>,
}

impl Message {
    /// Create unsigned metadata describing `content`, created now
    pub fn new(
        id: impl Into<String>,
        recipient: impl Into<String>,
        content: &[u8],
        lifespan: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            recipient: recipient.into(),
            creation_time: Utc::now(),
            lifespan,
            length: content.len() as u64,
            sha256: crate::integrity::calculate_digest(content),
            hops: Vec::new(),
            sender_blessings: Blessings::default(),
            sender_discharges: Vec::new(),
            signature: Vec::new(),
        }
    }

    /// Absolute instant after which the message is expired
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.lifespan)
            .ok()
            .and_then(|lifespan| self.creation_time.checked_add_signed(lifespan))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Copy of this message with `node_id` appended to the hop list
    pub fn with_hop(&self, node_id: &str) -> Self {
        let mut message = self.clone();
        message.hops.push(node_id.to_string());
        message
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Canonical bytes covered by the signature.
    ///
    /// Layout: domain tag, then `id` and `recipient` as u32 length-prefixed
    /// UTF-8, creation time as i64 unix seconds and u32 subsecond nanos,
    /// lifespan as u64 seconds and u32 subsecond nanos, length as u64, and the
    /// 32-byte digest. All integers are big-endian. Both time fields are
    /// encoded at the precision expiry is computed with. Hops and credentials
    /// are not covered.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(
            SIGNING_DOMAIN.len() + 8 + self.id.len() + self.recipient.len() + 32 + 32,
        );
        payload.extend_from_slice(SIGNING_DOMAIN);
        put_str(&mut payload, &self.id);
        put_str(&mut payload, &self.recipient);
        payload.extend_from_slice(&self.creation_time.timestamp().to_be_bytes());
        payload.extend_from_slice(&self.creation_time.timestamp_subsec_nanos().to_be_bytes());
        payload.extend_from_slice(&self.lifespan.as_secs().to_be_bytes());
        payload.extend_from_slice(&self.lifespan.subsec_nanos().to_be_bytes());
        payload.extend_from_slice(&self.length.to_be_bytes());
        payload.extend_from_slice(&self.sha256);
        payload
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.sha256)
    }
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}
