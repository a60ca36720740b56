//! Shared server state

use std::sync::Arc;

use fota_core::{BlobGateway, CatalogGateway, TelemetryStore};

use crate::config::ServerConfig;
use crate::feedback::FeedbackIngestor;
use crate::registry::SessionRegistry;
use crate::transfer::TransferEngine;
use crate::update::UpdateChecker;

/// Everything a connection needs, shared across all connection tasks
pub struct ServerContext {
    pub config: ServerConfig,
    pub catalog: Arc<dyn CatalogGateway>,
    pub telemetry: Arc<dyn TelemetryStore>,
    pub registry: Arc<SessionRegistry>,
    pub updates: UpdateChecker,
    pub transfers: TransferEngine,
    pub feedback: FeedbackIngestor,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        catalog: Arc<dyn CatalogGateway>,
        blobs: Arc<dyn BlobGateway>,
        telemetry: Arc<dyn TelemetryStore>,
    ) -> Arc<Self> {
        let registry = SessionRegistry::new(config.server.reject_duplicate_sessions);
        let updates = UpdateChecker::new(Arc::clone(&catalog));
        let transfers =
            TransferEngine::new(blobs, config.transfer.chunk_size, config.ack_timeout());
        let feedback = FeedbackIngestor::new(
            Arc::clone(&catalog),
            Arc::clone(&telemetry),
            Arc::clone(&registry),
        );

        Arc::new(Self {
            config,
            catalog,
            telemetry,
            registry,
            updates,
            transfers,
            feedback,
        })
    }
}
