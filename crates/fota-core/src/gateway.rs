//! Gateway traits - the narrow interfaces the server consumes
//!
//! The update server never touches a database or object store directly.
//! Catalog metadata, firmware images and telemetry persistence are reached
//! through the three traits below so deployments can plug in whatever
//! backing store they run.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    find_car_type, CarFlashingHistory, CarType, DownloadRequest, FlashingFeedback,
    FlashingMetrics, MetricsKey, Session,
};

// =============================================================================
// Catalog
// =============================================================================

/// Read-mostly catalog of car types, ECUs and firmware versions.
///
/// Only `load_car_types` is required; lookups default to a full load
/// followed by an in-memory search, which is how the server consumes the
/// catalog (fresh snapshot per authentication / update check).
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Load every car type with its ECUs and versions
    async fn load_car_types(&self) -> GatewayResult<Vec<CarType>>;

    /// Find a car type by name (case-insensitive)
    async fn find_car_type(&self, name: &str) -> GatewayResult<Option<CarType>> {
        let car_types = self.load_car_types().await?;
        Ok(find_car_type(&car_types, name).cloned())
    }

    /// Find a car type by model number (case-insensitive)
    async fn find_by_model(&self, model_number: &str) -> GatewayResult<Option<CarType>> {
        let wanted = crate::models::normalize(model_number);
        let car_types = self.load_car_types().await?;
        Ok(car_types
            .into_iter()
            .find(|ct| crate::models::normalize(&ct.model_number) == wanted))
    }

    /// Whether `car_id` belongs to the car type named `car_type`
    async fn verify_car_id(&self, car_type: &str, car_id: &str) -> GatewayResult<bool> {
        Ok(self
            .find_car_type(car_type)
            .await?
            .map(|ct| ct.has_car_id(car_id))
            .unwrap_or(false))
    }

    /// Insert or replace a car type (matched by name and model number)
    async fn save_car_type(&self, car_type: &CarType) -> GatewayResult<()> {
        let _ = car_type;
        Err(GatewayError::NotSupported("save_car_type".to_string()))
    }
}

// =============================================================================
// Firmware blobs
// =============================================================================

/// Random-access reads over firmware images addressed by opaque location
#[async_trait]
pub trait BlobGateway: Send + Sync {
    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Returns `Ok(None)` when nothing can be read (offset at/after EOF, or
    /// the blob is unreadable). A short read near EOF returns the remainder.
    async fn read_range(&self, location: &str, offset: u64, len: usize)
        -> GatewayResult<Option<Bytes>>;

    /// Size of the image in bytes
    async fn size(&self, location: &str) -> GatewayResult<u64>;
}

// =============================================================================
// Telemetry persistence
// =============================================================================

/// Filter for raw feedback listings
#[derive(Debug, Clone, Default)]
pub struct FeedbackFilter {
    /// Only feedback received at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive car type match
    pub car_type: Option<String>,
    /// Case-insensitive vehicle id match
    pub car_id: Option<String>,
    /// Maximum number of records, most recent first
    pub limit: Option<usize>,
}

impl FeedbackFilter {
    pub fn matches(&self, feedback: &FlashingFeedback) -> bool {
        use crate::models::normalize;

        if let Some(since) = self.since {
            if feedback.received_timestamp < since {
                return false;
            }
        }
        if let Some(ref car_type) = self.car_type {
            if normalize(&feedback.car_type) != normalize(car_type) {
                return false;
            }
        }
        if let Some(ref car_id) = self.car_id {
            if normalize(&feedback.car_id) != normalize(car_id) {
                return false;
            }
        }
        true
    }
}

/// Storage for flashing feedback, aggregates, and the request audit trail
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Persist a feedback record. Fails with `Duplicate` if the session id exists.
    async fn insert_feedback(&self, feedback: &FlashingFeedback) -> GatewayResult<()>;

    /// Look up feedback by session id
    async fn get_feedback(&self, session_id: &str) -> GatewayResult<Option<FlashingFeedback>>;

    /// List feedback matching `filter`, most recently received first
    async fn list_feedback(&self, filter: &FeedbackFilter) -> GatewayResult<Vec<FlashingFeedback>>;

    async fn load_metrics(&self, key: &MetricsKey) -> GatewayResult<Option<FlashingMetrics>>;

    async fn save_metrics(&self, metrics: &FlashingMetrics) -> GatewayResult<()>;

    /// All metrics rows, optionally restricted to one car type
    async fn list_metrics(&self, car_type: Option<&str>) -> GatewayResult<Vec<FlashingMetrics>>;

    async fn load_history(&self, car_id: &str) -> GatewayResult<Option<CarFlashingHistory>>;

    async fn save_history(&self, history: &CarFlashingHistory) -> GatewayResult<()>;

    /// Audit record of a finished connection session
    async fn record_session(&self, session: &Session) -> GatewayResult<()> {
        let _ = session;
        Ok(())
    }

    /// Audit record of a finished download request
    async fn record_download(&self, download: &DownloadRequest) -> GatewayResult<()> {
        let _ = download;
        Ok(())
    }
}
