//! Metadata framing for transports

use crate::message::types::Message;
use thiserror::Error;

/// Largest encoded metadata frame accepted from a peer
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Metadata frame of {size} bytes exceeds limit {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// Encode metadata into a single frame
pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
    let frame = bincode::serialize(message)?;
    if frame.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(frame)
}

/// Decode a frame produced by [`encode`]
pub fn decode(frame: &[u8]) -> Result<Message, WireError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(bincode::deserialize(frame)?)
}
