//! fota-core - Core data model and gateway traits for the FOTA update server
//!
//! This crate holds the types shared by the protocol engine, the store
//! implementations and the client: the catalog model, per-connection
//! session and download records, flashing feedback aggregates, and the
//! gateway traits through which the server reaches persistence.

pub mod error;
pub mod gateway;
pub mod models;

pub use error::{GatewayError, GatewayResult};
pub use gateway::{BlobGateway, CatalogGateway, FeedbackFilter, TelemetryStore};
pub use models::*;
