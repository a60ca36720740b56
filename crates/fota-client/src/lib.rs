//! FOTA Client Library
//!
//! Speaks the vehicle side of the FOTA protocol over TCP.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use fota_client::{ChunkAction, FotaClient};
//! use fota_core::ServiceType;
//! use fota_proto::DownloadRequestPayload;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut client = FotaClient::connect("127.0.0.1:5000").await?;
//!
//!     let mut installed = BTreeMap::new();
//!     installed.insert("Engine_Control_Module".to_string(), "1.0.0".to_string());
//!
//!     // Authenticate; the server answers with an update check
//!     let handshake = client
//!         .handshake("ModelX", "MX2023-001", ServiceType::DownloadUpdate, &installed)
//!         .await?;
//!
//!     let result = client
//!         .download(
//!             DownloadRequestPayload {
//!                 required_versions: handshake.updates_needed,
//!                 old_versions: installed,
//!                 ..Default::default()
//!             },
//!             |_| ChunkAction::Ack,
//!         )
//!         .await?;
//!     println!("{}", result.complete.status);
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides an in-process server for integration tests:
//!
//! ```rust,ignore
//! use fota_client::testing::TestServer;
//!
//! let server = TestServer::start(car_types).await?;
//! let mut client = server.client().await?;
//! ```

mod client;
mod error;
pub mod testing;

pub use client::{ChunkAction, DownloadResult, FotaClient, Handshake};
pub use error::{ClientError, Result};
