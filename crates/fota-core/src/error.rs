//! Common error types for catalog, blob and telemetry gateways

use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur in persistence gateways
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Car type not present in the catalog
    #[error("Car type not found: {0}")]
    CarTypeNotFound(String),

    /// Firmware image not found at the given location
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Location cannot be resolved by this blob store
    #[error("Invalid blob location: {0}")]
    InvalidLocation(String),

    /// Record already exists (e.g. duplicate feedback session)
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Operation not supported by this gateway
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Catalog document could not be parsed
    #[error("Malformed catalog: {0}")]
    Malformed(String),

    /// Underlying storage failure (I/O, database, ...)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    /// Returns the protocol error code for this error
    pub fn code(&self) -> u16 {
        match self {
            GatewayError::CarTypeNotFound(_) => 404,
            GatewayError::BlobNotFound(_) => 404,
            GatewayError::InvalidLocation(_) => 400,
            GatewayError::Duplicate(_) => 409,
            GatewayError::NotSupported(_) => 501,
            GatewayError::Malformed(_) => 500,
            GatewayError::Storage(_) => 503,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => GatewayError::BlobNotFound(err.to_string()),
            _ => GatewayError::Storage(err.to_string()),
        }
    }
}
