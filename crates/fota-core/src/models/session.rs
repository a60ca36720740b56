//! Per-connection session (request) model

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service requested by a vehicle at handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    #[serde(rename = "checkingForUpdate", alias = "CHECK_FOR_UPDATE")]
    CheckForUpdate,
    #[serde(rename = "downloadingNewUpdate", alias = "DOWNLOAD_UPDATE")]
    DownloadUpdate,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceType::CheckForUpdate => "checkingForUpdate",
            ServiceType::DownloadUpdate => "downloadingNewUpdate",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkingForUpdate" | "CHECK_FOR_UPDATE" => Ok(ServiceType::CheckForUpdate),
            "downloadingNewUpdate" | "DOWNLOAD_UPDATE" => Ok(ServiceType::DownloadUpdate),
            _ => Err(format!("Unknown service type: '{}'", s)),
        }
    }
}

/// Status of a session.
///
/// ```text
/// CheckingAuthenticity ──► Authenticated ──► ServiceInProgress ──► FinishedSuccessfully
///          │                                        │
///          ▼                                        ▼
///   NonAuthenticated                              Failed
/// ```
///
/// A session re-enters `ServiceInProgress` for every serviced message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    CheckingAuthenticity,
    Authenticated,
    NonAuthenticated,
    ServiceInProgress,
    FinishedSuccessfully,
    Failed,
}

/// A vehicle's connection-scoped request record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// When the handshake was received
    pub timestamp: DateTime<Utc>,
    pub car_type: String,
    pub car_id: String,
    /// Peer address of the connection
    pub peer: SocketAddr,
    pub service_type: ServiceType,
    /// Metadata from the handshake, replaced by each download request
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub status: RequestStatus,
}

impl Session {
    /// Create a session at handshake time
    pub fn new(
        car_type: impl Into<String>,
        car_id: impl Into<String>,
        peer: SocketAddr,
        service_type: ServiceType,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            car_type: car_type.into(),
            car_id: car_id.into(),
            peer,
            service_type,
            metadata,
            status: RequestStatus::CheckingAuthenticity,
        }
    }
}
