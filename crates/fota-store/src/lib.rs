//! Gateway implementations for the update server
//!
//! - [`catalog`] - in-memory and file-backed (JSON/YAML/TOML) catalogs
//! - [`blob`] - filesystem and in-memory firmware image stores
//! - [`telemetry`] - in-memory feedback, metrics and audit tables

pub mod blob;
pub mod catalog;
pub mod telemetry;

pub use blob::{FsBlobStore, MemoryBlobStore};
pub use catalog::{CatalogDocument, CatalogFormat, FileCatalog, MemoryCatalog};
pub use telemetry::MemoryTelemetryStore;
