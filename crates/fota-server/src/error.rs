//! Connection-level errors

use fota_core::GatewayError;
use fota_proto::{MessageError, ProtocolError};
use thiserror::Error;

/// Errors raised while servicing a connection.
///
/// `code()` gives the ERROR payload code sent to the vehicle.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Framing failure; the connection is closed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Well-framed message that is not a valid typed message
    #[error("{0}")]
    Message(#[from] MessageError),

    /// First message absent, not a HANDSHAKE, or missing fields
    #[error("{0}")]
    InvalidHandshake(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Vehicle id already owned by a live connection
    #[error("Vehicle {0} already has an active session")]
    DuplicateSession(String),

    /// Semantically incomplete request
    #[error("{0}")]
    Validation(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ConnectionError {
    pub fn code(&self) -> u16 {
        match self {
            ConnectionError::Protocol(_) => 400,
            ConnectionError::Message(_) => 400,
            ConnectionError::InvalidHandshake(_) => 400,
            ConnectionError::AuthenticationFailed => 401,
            ConnectionError::DuplicateSession(_) => 409,
            ConnectionError::Validation(_) => 400,
            ConnectionError::Transfer(_) => 500,
            ConnectionError::Gateway(e) => e.code(),
        }
    }

    /// Whether the connection can keep servicing after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionError::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fota_proto::MessageType;

    #[test]
    fn test_codes() {
        assert_eq!(ConnectionError::AuthenticationFailed.code(), 401);
        assert_eq!(ConnectionError::DuplicateSession("x".into()).code(), 409);
        assert_eq!(
            ConnectionError::Message(MessageError::UnknownType("X".into())).code(),
            400
        );
        assert_eq!(
            ConnectionError::Gateway(GatewayError::CarTypeNotFound("ModelZ".into())).code(),
            404
        );
        assert_eq!(
            ConnectionError::Gateway(GatewayError::Storage("down".into())).code(),
            503
        );
    }

    #[test]
    fn test_message_error_text() {
        let err = ConnectionError::from(MessageError::UnknownType("REBOOT".into()));
        assert_eq!(err.to_string(), "Unknown message type: REBOOT");
        let err = ConnectionError::from(MessageError::Unexpected(MessageType::FileChunk));
        assert!(!err.is_fatal());
        assert!(ConnectionError::from(ProtocolError::ConnectionClosed).is_fatal());
    }
}
