//! Envelope framing: plain JSON text or base64-wrapped binary.
//!
//! The binary variant exists for transports that prefer opaque frames;
//! compression flags and encryption keys travel out-of-band and are not
//! this layer's concern.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::protocol::Envelope;

/// Framing failure while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame was not valid envelope JSON.
    #[error("invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame was not valid base64.
    #[error("invalid base64 frame: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded bytes were not UTF-8.
    #[error("frame payload is not UTF-8")]
    Utf8,
}

/// Encode an envelope as a JSON text frame.
pub fn encode_text(envelope: &Envelope) -> Result<String, FrameError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Encode an envelope as a base64 binary frame.
pub fn encode_binary(envelope: &Envelope) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_string(envelope)?;
    Ok(BASE64.encode(json).into_bytes())
}

/// Decode a text frame.
pub fn decode_text(frame: &str) -> Result<Envelope, FrameError> {
    Ok(serde_json::from_str(frame)?)
}

/// Decode a base64 binary frame.
pub fn decode_binary(frame: &[u8]) -> Result<Envelope, FrameError> {
    let raw = BASE64.decode(frame)?;
    let text = std::str::from_utf8(&raw).map_err(|_| FrameError::Utf8)?;
    decode_text(text)
}
