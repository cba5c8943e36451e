use crate::message::types::{Blessings, Message};
use ed25519_dalek::{Signer, SigningKey};

/// Sign `message` with `key`, replacing its blessings with the key's public half.
///
/// The result verifies under [`crate::integrity::Ed25519Identity`].
pub fn sign(message: &mut Message, key: &SigningKey) {
    message.sender_blessings = Blessings(key.verifying_key().to_bytes().to_vec());
    message.signature = key.sign(&message.signing_payload()).to_bytes().to_vec();
}
