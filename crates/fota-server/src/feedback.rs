//! Flashing feedback ingestion and metrics queries

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use fota_core::{
    CarFlashingHistory, CatalogGateway, FeedbackFilter, FlashingFeedback, FlashingMetrics,
    FlashingStatus, GatewayError, GatewayResult, MetricsKey, TelemetryStore,
};
use fota_proto::{FeedbackData, FlashingFeedbackAck, MetricsRequest, MetricsResponse};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::registry::SessionRegistry;

/// Default window for `summary` queries
pub const DEFAULT_SUMMARY_DAYS: i64 = 7;
pub const MAX_SUMMARY_DAYS: i64 = 3650;
/// Default and maximum row counts for list queries
pub const DEFAULT_LIST_LIMIT: usize = 10;
pub const MAX_LIST_LIMIT: usize = 100;

/// Supported `metrics_type` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsKind {
    Summary,
    CarHistory,
    EcuPerformance,
    RecentFeedback,
    ActiveDownloads,
}

impl std::str::FromStr for MetricsKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(MetricsKind::Summary),
            "car_history" => Ok(MetricsKind::CarHistory),
            "ecu_performance" => Ok(MetricsKind::EcuPerformance),
            "recent_feedback" => Ok(MetricsKind::RecentFeedback),
            "active_downloads" => Ok(MetricsKind::ActiveDownloads),
            other => Err(format!("Unknown metrics type: {}", other)),
        }
    }
}

/// Parse a flashing timestamp: RFC 3339, or naive ISO 8601 taken as UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Check presence and shape of every required field
pub fn validate(data: &FeedbackData) -> Result<FlashingFeedback, String> {
    let mut missing = Vec::new();
    if data.session_id.as_deref().map_or(true, str::is_empty) {
        missing.push("session_id");
    }
    if data.car_id.as_deref().map_or(true, str::is_empty) {
        missing.push("car_id");
    }
    if data.car_type.as_deref().map_or(true, str::is_empty) {
        missing.push("car_type");
    }
    if data.flashing_timestamp.is_none() {
        missing.push("flashing_timestamp");
    }
    if data.overall_status.is_none() {
        missing.push("overall_status");
    }
    if data.total_ecus.is_none() {
        missing.push("total_ecus");
    }
    if data.final_ecu_versions.is_none() {
        missing.push("final_ecu_versions");
    }
    if !missing.is_empty() {
        return Err(format!("Missing required fields: {}", missing.join(", ")));
    }

    let raw_ts = data.flashing_timestamp.as_deref().unwrap_or_default();
    let flashing_timestamp =
        parse_timestamp(raw_ts).ok_or_else(|| format!("Invalid flashing_timestamp: {}", raw_ts))?;
    let raw_status = data.overall_status.as_deref().unwrap_or_default();
    let overall_status: FlashingStatus = raw_status
        .parse()
        .map_err(|_| format!("Invalid overall_status: {}", raw_status))?;

    Ok(FlashingFeedback {
        session_id: data.session_id.clone().unwrap_or_default(),
        car_id: data.car_id.clone().unwrap_or_default(),
        car_type: data.car_type.clone().unwrap_or_default(),
        flashing_timestamp,
        overall_status,
        total_ecus: data.total_ecus.unwrap_or_default(),
        successful_ecus: data.successful_ecus.clone().unwrap_or_default(),
        rolled_back_ecus: data.rolled_back_ecus.clone().unwrap_or_default(),
        final_ecu_versions: data.final_ecu_versions.clone().unwrap_or_default(),
        android_app_version: data.android_app_version.clone(),
        beaglebone_version: data.beaglebone_version.clone(),
        request_id: data.request_id.clone(),
        received_timestamp: Utc::now(),
    })
}

/// Metrics deltas produced by one feedback report
fn metrics_deltas(feedback: &FlashingFeedback) -> BTreeMap<MetricsKey, (u64, u64, u64)> {
    let mut deltas: BTreeMap<MetricsKey, (u64, u64, u64)> = BTreeMap::new();
    for ecu in &feedback.successful_ecus {
        let key = MetricsKey::new(&feedback.car_type, ecu, feedback.final_version(ecu));
        deltas.entry(key).or_default().0 += 1;
    }
    for ecu in &feedback.rolled_back_ecus {
        let key = MetricsKey::new(&feedback.car_type, ecu, feedback.final_version(ecu));
        deltas.entry(key).or_default().2 += 1;
    }
    // Car-type row carries the failures that cannot be attributed to an ECU
    deltas.insert(
        MetricsKey::aggregate(&feedback.car_type),
        (
            feedback.successful_ecus.len() as u64,
            u64::from(feedback.unaccounted_ecus()),
            feedback.rolled_back_ecus.len() as u64,
        ),
    );
    deltas
}

pub struct FeedbackIngestor {
    catalog: Arc<dyn CatalogGateway>,
    telemetry: Arc<dyn TelemetryStore>,
    registry: Arc<SessionRegistry>,
    /// Serialises read-modify-write cycles on metrics and history
    ingest_lock: tokio::sync::Mutex<()>,
}

impl FeedbackIngestor {
    pub fn new(
        catalog: Arc<dyn CatalogGateway>,
        telemetry: Arc<dyn TelemetryStore>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            catalog,
            telemetry,
            registry,
            ingest_lock: tokio::sync::Mutex::new(()),
        }
    }

    // =========================================================================
    // Record path
    // =========================================================================

    /// Validate and persist one report. Never fails; problems are reported
    /// in the ack.
    pub async fn record(&self, data: &FeedbackData) -> FlashingFeedbackAck {
        let session_id = data.session_id.clone();
        match self.try_record(data).await {
            Ok(feedback) => {
                info!(
                    session_id = %feedback.session_id,
                    car_id = %feedback.car_id,
                    status = %feedback.overall_status,
                    "Flashing feedback recorded"
                );
                ack(true, "Feedback recorded successfully", session_id)
            }
            Err(message) => {
                warn!(session_id = ?session_id, reason = %message, "Flashing feedback rejected");
                ack(false, message, session_id)
            }
        }
    }

    async fn try_record(&self, data: &FeedbackData) -> Result<FlashingFeedback, String> {
        let mut feedback = validate(data)?;

        let entry = self
            .catalog
            .find_car_type(&feedback.car_type)
            .await
            .map_err(|e| format!("Catalog unavailable: {}", e))?
            .filter(|ct| ct.has_car_id(&feedback.car_id))
            .ok_or_else(|| {
                format!(
                    "Unknown vehicle {} for car type {}",
                    feedback.car_id, feedback.car_type
                )
            })?;
        feedback.car_type = entry.name;

        let _guard = self.ingest_lock.lock().await;
        match self.telemetry.get_feedback(&feedback.session_id).await {
            Ok(None) => {}
            Ok(Some(_)) => return Err("Duplicate flashing session".to_string()),
            Err(e) => return Err(format!("Failed to store feedback: {}", e)),
        }

        // The record is stored last so a report whose aggregates failed can be resent
        self.apply_aggregates(&feedback)
            .await
            .map_err(|e| format!("Failed to update metrics: {}", e))?;
        match self.telemetry.insert_feedback(&feedback).await {
            Ok(()) => Ok(feedback),
            Err(GatewayError::Duplicate(_)) => Err("Duplicate flashing session".to_string()),
            Err(e) => Err(format!("Failed to store feedback: {}", e)),
        }
    }

    /// Load every affected row before writing any of them
    async fn apply_aggregates(&self, feedback: &FlashingFeedback) -> GatewayResult<()> {
        let mut rows = Vec::new();
        for (key, (successful, failed, rolled_back)) in metrics_deltas(feedback) {
            let mut metrics = self
                .telemetry
                .load_metrics(&key)
                .await?
                .unwrap_or_else(|| FlashingMetrics::new(&key));
            metrics.record(successful, failed, rolled_back);
            rows.push(metrics);
        }

        let mut history = self
            .telemetry
            .load_history(&feedback.car_id)
            .await?
            .unwrap_or_else(|| CarFlashingHistory::new(&feedback.car_id, &feedback.car_type));
        history.record(feedback);

        for metrics in &rows {
            self.telemetry.save_metrics(metrics).await?;
        }
        self.telemetry.save_history(&history).await
    }

    // =========================================================================
    // Query path
    // =========================================================================

    /// Answer a metrics request. Unknown kinds and storage failures come
    /// back as `{error: ...}` payloads.
    ///
    /// The `summary` window covers reports *received* in the last `days`
    /// days (`received_timestamp`), whatever their `flashing_timestamp`.
    pub async fn query(&self, request: &MetricsRequest) -> MetricsResponse {
        let kind = request.metrics_type.as_deref().unwrap_or("summary");
        let metrics = match kind.parse::<MetricsKind>() {
            Ok(kind) => self
                .run_query(kind, request)
                .await
                .unwrap_or_else(|e| json!({ "error": e.to_string() })),
            Err(message) => json!({ "error": message }),
        };
        MetricsResponse {
            metrics,
            timestamp: Utc::now(),
        }
    }

    async fn run_query(&self, kind: MetricsKind, request: &MetricsRequest) -> GatewayResult<Value> {
        let car_type = request.car_type_filter.clone().filter(|s| !s.is_empty());
        let limit = request
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        match kind {
            MetricsKind::Summary => {
                let days = request
                    .days
                    .filter(|d| *d > 0)
                    .unwrap_or(DEFAULT_SUMMARY_DAYS)
                    .min(MAX_SUMMARY_DAYS);
                let filter = FeedbackFilter {
                    since: Some(Utc::now() - Duration::days(days)),
                    car_type: car_type.clone(),
                    ..Default::default()
                };
                let feedback = self.telemetry.list_feedback(&filter).await?;
                Ok(summarize(&feedback, days, car_type.as_deref()))
            }
            MetricsKind::CarHistory => {
                let Some(car_id) = request.target_car_id.as_deref().filter(|s| !s.is_empty())
                else {
                    return Ok(json!({ "error": "target_car_id is required for car_history" }));
                };
                let history = self.telemetry.load_history(car_id).await?;
                Ok(json!({ "car_id": car_id, "history": history }))
            }
            MetricsKind::EcuPerformance => {
                let mut rows: Vec<FlashingMetrics> = self
                    .telemetry
                    .list_metrics(car_type.as_deref())
                    .await?
                    .into_iter()
                    .filter(|m| !m.key().is_aggregate())
                    .collect();
                rows.sort_by(|a, b| {
                    b.success_rate
                        .total_cmp(&a.success_rate)
                        .then(b.total_attempts.cmp(&a.total_attempts))
                });
                rows.truncate(limit);
                Ok(json!({ "count": rows.len(), "ecus": rows }))
            }
            MetricsKind::RecentFeedback => {
                let filter = FeedbackFilter {
                    car_type,
                    car_id: request.target_car_id.clone().filter(|s| !s.is_empty()),
                    limit: Some(limit),
                    ..Default::default()
                };
                let feedback = self.telemetry.list_feedback(&filter).await?;
                Ok(json!({ "count": feedback.len(), "feedback": feedback }))
            }
            MetricsKind::ActiveDownloads => {
                let downloads: Vec<Value> = self
                    .registry
                    .active_downloads()
                    .iter()
                    .map(|d| {
                        json!({
                            "car_id": d.car_id,
                            "car_type": d.car_type,
                            "status": d.status(),
                            "total_size": d.total_size,
                            "transferred_size": d.transferred_size,
                            "percent": d.percent(),
                            "active_transfers": d.active_transfers,
                            "started": d.timestamp,
                        })
                    })
                    .collect();
                let sessions: Vec<Value> = self
                    .registry
                    .active_sessions()
                    .iter()
                    .map(|s| {
                        json!({
                            "car_id": s.car_id,
                            "car_type": s.car_type,
                            "peer": s.peer.to_string(),
                            "service_type": s.service_type,
                            "status": s.status,
                            "started": s.timestamp,
                        })
                    })
                    .collect();
                Ok(json!({
                    "count": downloads.len(),
                    "downloads": downloads,
                    "session_count": sessions.len(),
                    "sessions": sessions,
                }))
            }
        }
    }
}

fn ack(success: bool, message: impl Into<String>, session_id: Option<String>) -> FlashingFeedbackAck {
    FlashingFeedbackAck {
        success,
        message: message.into(),
        session_id,
        timestamp: Utc::now(),
    }
}

fn summarize(feedback: &[FlashingFeedback], days: i64, car_type: Option<&str>) -> Value {
    let count = |status: FlashingStatus| {
        feedback
            .iter()
            .filter(|f| f.overall_status == status)
            .count()
    };
    let total = feedback.len();
    let completed = count(FlashingStatus::Completed);
    let success_rate = if total > 0 {
        completed as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    json!({
        "period_days": days,
        "car_type_filter": car_type,
        "total_sessions": total,
        "completed": completed,
        "partial_failure": count(FlashingStatus::PartialFailure),
        "failed": count(FlashingStatus::Failed),
        "success_rate": success_rate,
        "total_ecus": feedback.iter().map(|f| u64::from(f.total_ecus)).sum::<u64>(),
        "successful_ecus": feedback.iter().map(|f| f.successful_ecus.len()).sum::<usize>(),
        "rolled_back_ecus": feedback.iter().map(|f| f.rolled_back_ecus.len()).sum::<usize>(),
    })
}
