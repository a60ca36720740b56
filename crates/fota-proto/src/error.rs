//! Protocol-layer errors

use thiserror::Error;

use crate::message::MessageType;

/// Framing-level failures. Any of these leaves the stream unusable.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid length prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: u64, max: usize },

    #[error("Length mismatch: declared {declared} bytes, read {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Malformed body: {0}")]
    MalformedBody(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for errors caused by the peer going away rather than bad data
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// A well-framed message that cannot be turned into a typed message.
/// The stream stays usable.
#[derive(Debug, Clone, Error)]
pub enum MessageError {
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Unexpected message type: {0}")]
    Unexpected(MessageType),

    #[error("Invalid {msg_type} payload: {reason}")]
    InvalidPayload {
        msg_type: MessageType,
        reason: String,
    },
}
