//! Length-prefixed frame codec
//!
//! ```text
//! +----------------------+-------------------------------------------+
//! | 10 ASCII digits      | UTF-8 JSON body                           |
//! | body length (bytes)  | {"type": "<MESSAGE_TYPE>", "payload": {}} |
//! +----------------------+-------------------------------------------+
//! ```

use crate::error::ProtocolError;
use crate::message::{Envelope, ToEnvelope};

/// Width of the decimal length prefix
pub const PREFIX_LEN: usize = 10;

/// Largest length the prefix can express
pub const MAX_DECLARED_LEN: u64 = 9_999_999_999;

/// Encode a message into a complete frame
pub fn encode<M: ToEnvelope + ?Sized>(message: &M) -> Result<Vec<u8>, ProtocolError> {
    encode_envelope(&message.to_envelope()?)
}

/// Encode a raw envelope into a complete frame
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(envelope).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    if body.len() as u64 > MAX_DECLARED_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: body.len() as u64,
            max: MAX_DECLARED_LEN as usize,
        });
    }
    let mut frame = Vec::with_capacity(PREFIX_LEN + body.len());
    frame.extend_from_slice(format!("{:0width$}", body.len(), width = PREFIX_LEN).as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse the 10-digit length prefix
pub fn parse_prefix(prefix: &[u8]) -> Result<u64, ProtocolError> {
    if prefix.len() != PREFIX_LEN || !prefix.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::InvalidPrefix(
            String::from_utf8_lossy(prefix).into_owned(),
        ));
    }
    Ok(prefix
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0')))
}

/// Decode a frame body (without prefix)
pub fn decode_body(body: &[u8]) -> Result<Envelope, ProtocolError> {
    serde_json::from_slice(body).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
}

/// Decode one complete frame. The buffer must hold exactly one frame.
pub fn decode(frame: &[u8]) -> Result<Envelope, ProtocolError> {
    if frame.len() < PREFIX_LEN {
        return Err(ProtocolError::InvalidPrefix(
            String::from_utf8_lossy(frame).into_owned(),
        ));
    }
    let (prefix, body) = frame.split_at(PREFIX_LEN);
    let declared = parse_prefix(prefix)?;
    if declared != body.len() as u64 {
        return Err(ProtocolError::LengthMismatch {
            declared: declared as usize,
            actual: body.len(),
        });
    }
    decode_body(body)
}
