//! Error types for FOTA client operations

use fota_proto::{MessageError, MessageType, ProtocolError};
use thiserror::Error;

/// Result type alias for FOTA client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur during FOTA client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Framing or transport failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server sent a frame that is not a valid server message
    #[error("Invalid server message: {0}")]
    InvalidMessage(#[from] MessageError),

    /// Server replied with an ERROR message
    #[error("Server error {code}: {message}")]
    ServerError { code: u16, message: String },

    /// Server replied with a message other than the one expected
    #[error("Expected {expected}, got {got}")]
    UnexpectedReply {
        expected: MessageType,
        got: MessageType,
    },

    /// Chunk data was not valid hex
    #[error("Invalid chunk data for {ecu_name} at offset {offset}")]
    InvalidChunk { ecu_name: String, offset: u64 },

    /// Server closed the connection
    #[error("Connection closed by server")]
    ConnectionClosed,
}

impl ClientError {
    /// Create a server error from an ERROR payload
    pub fn server_error(code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    /// ERROR code if the server rejected the request
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }
}
