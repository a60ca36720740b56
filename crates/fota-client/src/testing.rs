//! Test utilities for fota-client
//!
//! Provides an in-process server over in-memory stores for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fota_core::CarType;
use fota_server::{Listener, ServerConfig, ServerContext};
use fota_store::{MemoryBlobStore, MemoryCatalog, MemoryTelemetryStore};
use tokio::net::TcpListener;

use crate::{FotaClient, Result};

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    pub ctx: Arc<ServerContext>,
    pub catalog: Arc<MemoryCatalog>,
    pub blobs: Arc<MemoryBlobStore>,
    pub telemetry: Arc<MemoryTelemetryStore>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Start a server on an ephemeral port with default configuration
    ///
    /// # Example
    ///
    /// ```ignore
    /// use fota_client::testing::TestServer;
    ///
    /// let server = TestServer::start(vec![model_x()]).await?;
    /// server.blobs.insert("ecm_1.2.0.hex", firmware);
    /// let mut client = server.client().await?;
    /// ```
    pub async fn start(car_types: Vec<CarType>) -> Result<Self> {
        Self::start_with_config(car_types, ServerConfig::default()).await
    }

    /// Start a server with a custom configuration. The listen address in
    /// `config` is ignored.
    pub async fn start_with_config(car_types: Vec<CarType>, config: ServerConfig) -> Result<Self> {
        let catalog = Arc::new(MemoryCatalog::new(car_types));
        let blobs = Arc::new(MemoryBlobStore::new());
        let telemetry = Arc::new(MemoryTelemetryStore::new());
        let ctx = ServerContext::new(config, catalog.clone(), blobs.clone(), telemetry.clone());

        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let listener = Listener::new(listener, Arc::clone(&ctx));
        let handle = tokio::spawn(async move {
            listener
                .run_until(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            addr,
            ctx,
            catalog,
            blobs,
            telemetry,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Open a new client connection
    pub async fn client(&self) -> Result<FotaClient> {
        FotaClient::connect_with_timeout(self.addr, Duration::from_secs(5)).await
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}
