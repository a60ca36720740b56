//! In-memory telemetry store

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use fota_core::models::normalize;
use fota_core::{
    CarFlashingHistory, DownloadRequest, FeedbackFilter, FlashingFeedback, FlashingMetrics,
    GatewayError, GatewayResult, MetricsKey, Session, TelemetryStore,
};
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Tables {
    /// Insertion order
    feedback: Vec<FlashingFeedback>,
    metrics: BTreeMap<MetricsKey, FlashingMetrics>,
    /// Keyed by normalized car id
    history: HashMap<String, CarFlashingHistory>,
    sessions: Vec<Session>,
    downloads: Vec<DownloadRequest>,
}

/// Telemetry tables kept in process memory
#[derive(Debug, Default)]
pub struct MemoryTelemetryStore {
    tables: RwLock<Tables>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions recorded at connection teardown, oldest first
    pub fn sessions(&self) -> Vec<Session> {
        self.tables.read().sessions.clone()
    }

    /// Download requests recorded when transfers ended, oldest first
    pub fn downloads(&self) -> Vec<DownloadRequest> {
        self.tables.read().downloads.clone()
    }

    pub fn feedback_count(&self) -> usize {
        self.tables.read().feedback.len()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn insert_feedback(&self, feedback: &FlashingFeedback) -> GatewayResult<()> {
        let mut tables = self.tables.write();
        if tables
            .feedback
            .iter()
            .any(|f| f.session_id == feedback.session_id)
        {
            return Err(GatewayError::Duplicate(feedback.session_id.clone()));
        }
        tables.feedback.push(feedback.clone());
        Ok(())
    }

    async fn get_feedback(&self, session_id: &str) -> GatewayResult<Option<FlashingFeedback>> {
        Ok(self
            .tables
            .read()
            .feedback
            .iter()
            .find(|f| f.session_id == session_id)
            .cloned())
    }

    async fn list_feedback(&self, filter: &FeedbackFilter) -> GatewayResult<Vec<FlashingFeedback>> {
        let tables = self.tables.read();
        let mut matching: Vec<FlashingFeedback> = tables
            .feedback
            .iter()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        // Stable sort keeps later insertions first among equal receipt times
        matching.reverse();
        matching.sort_by(|a, b| b.received_timestamp.cmp(&a.received_timestamp));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn load_metrics(&self, key: &MetricsKey) -> GatewayResult<Option<FlashingMetrics>> {
        Ok(self.tables.read().metrics.get(key).cloned())
    }

    async fn save_metrics(&self, metrics: &FlashingMetrics) -> GatewayResult<()> {
        self.tables
            .write()
            .metrics
            .insert(metrics.key(), metrics.clone());
        Ok(())
    }

    async fn list_metrics(&self, car_type: Option<&str>) -> GatewayResult<Vec<FlashingMetrics>> {
        let wanted = car_type.map(normalize);
        Ok(self
            .tables
            .read()
            .metrics
            .values()
            .filter(|m| {
                wanted
                    .as_ref()
                    .map_or(true, |w| normalize(&m.car_type) == *w)
            })
            .cloned()
            .collect())
    }

    async fn load_history(&self, car_id: &str) -> GatewayResult<Option<CarFlashingHistory>> {
        Ok(self.tables.read().history.get(&normalize(car_id)).cloned())
    }

    async fn save_history(&self, history: &CarFlashingHistory) -> GatewayResult<()> {
        self.tables
            .write()
            .history
            .insert(normalize(&history.car_id), history.clone());
        Ok(())
    }

    async fn record_session(&self, session: &Session) -> GatewayResult<()> {
        self.tables.write().sessions.push(session.clone());
        Ok(())
    }

    async fn record_download(&self, download: &DownloadRequest) -> GatewayResult<()> {
        self.tables.write().downloads.push(download.clone());
        Ok(())
    }
}
