//! fota-server - vehicle-facing firmware-over-the-air update server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Listener                             │
//! │  One ConnectionHandler task per TCP connection              │
//! │                                                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │UpdateChecker │  │TransferEngine│  │FeedbackIngestor  │  │
//! │  │ (versions)   │  │ (chunks/acks)│  │ (metrics/history)│  │
//! │  └──────┬───────┘  └──────┬───────┘  └────────┬─────────┘  │
//! │         │                 │                   │            │
//! │  ┌──────┴───────┐  ┌──────┴───────┐  ┌────────┴─────────┐  │
//! │  │CatalogGateway│  │ BlobGateway  │  │ TelemetryStore   │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘  │
//! │                                                             │
//! │             SessionRegistry (one lease per vehicle)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod feedback;
pub mod listener;
pub mod registry;
pub mod transfer;
pub mod update;

pub use config::{ConfigError, ListenConfig, ServerConfig, StorageConfig, TransferConfig};
pub use connection::{ConnectionHandler, ConnectionState};
pub use context::ServerContext;
pub use error::ConnectionError;
pub use feedback::{FeedbackIngestor, MetricsKind};
pub use listener::Listener;
pub use registry::{SessionLease, SessionRegistry};
pub use transfer::{TransferEngine, TransferOutcome};
pub use update::{updates_needed, UpdateChecker};
