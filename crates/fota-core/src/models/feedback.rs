//! Post-flash outcome reports and the aggregates derived from them

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ECU name / version used for car-type-level aggregate metrics rows
pub const AGGREGATE_KEY: &str = "*";

/// Version recorded for ECUs reported without a final version
pub const UNKNOWN_VERSION: &str = "unknown";

/// Overall outcome of a flashing session as reported by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashingStatus {
    Completed,
    PartialFailure,
    Failed,
}

impl std::fmt::Display for FlashingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlashingStatus::Completed => "completed",
            FlashingStatus::PartialFailure => "partial_failure",
            FlashingStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FlashingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(FlashingStatus::Completed),
            "partial_failure" => Ok(FlashingStatus::PartialFailure),
            "failed" => Ok(FlashingStatus::Failed),
            _ => Err(format!("Unknown flashing status: '{}'", s)),
        }
    }
}

/// Immutable report of one flashing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashingFeedback {
    pub session_id: String,
    pub car_id: String,
    pub car_type: String,
    pub flashing_timestamp: DateTime<Utc>,
    pub overall_status: FlashingStatus,
    pub total_ecus: u32,
    #[serde(default)]
    pub successful_ecus: Vec<String>,
    #[serde(default)]
    pub rolled_back_ecus: Vec<String>,
    pub final_ecu_versions: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android_app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beaglebone_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Server receipt time
    pub received_timestamp: DateTime<Utc>,
}

impl FlashingFeedback {
    /// ECUs counted in `total_ecus` but named in neither outcome list
    pub fn unaccounted_ecus(&self) -> u32 {
        let named = (self.successful_ecus.len() + self.rolled_back_ecus.len()) as u32;
        self.total_ecus.saturating_sub(named)
    }

    /// Final version reported for an ECU
    pub fn final_version(&self, ecu_name: &str) -> &str {
        self.final_ecu_versions
            .get(ecu_name)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_VERSION)
    }
}

/// Identity of one metrics row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricsKey {
    pub car_type: String,
    pub ecu_name: String,
    pub version: String,
}

impl MetricsKey {
    pub fn new(
        car_type: impl Into<String>,
        ecu_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            car_type: car_type.into(),
            ecu_name: ecu_name.into(),
            version: version.into(),
        }
    }

    /// Key of the car-type-level aggregate row
    pub fn aggregate(car_type: impl Into<String>) -> Self {
        Self::new(car_type, AGGREGATE_KEY, AGGREGATE_KEY)
    }

    pub fn is_aggregate(&self) -> bool {
        self.ecu_name == AGGREGATE_KEY
    }
}

/// Attempt counters for one (car type, ECU, version) triple.
///
/// `successful_attempts + failed_attempts + rollback_attempts == total_attempts`
/// holds after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashingMetrics {
    pub car_type: String,
    pub ecu_name: String,
    pub version: String,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub rollback_attempts: u64,
    /// successful / total, in percent
    pub success_rate: f64,
    pub last_updated: DateTime<Utc>,
}

impl FlashingMetrics {
    pub fn new(key: &MetricsKey) -> Self {
        Self {
            car_type: key.car_type.clone(),
            ecu_name: key.ecu_name.clone(),
            version: key.version.clone(),
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            rollback_attempts: 0,
            success_rate: 0.0,
            last_updated: Utc::now(),
        }
    }

    pub fn key(&self) -> MetricsKey {
        MetricsKey::new(&self.car_type, &self.ecu_name, &self.version)
    }

    /// Add outcome counts and recompute the success rate
    pub fn record(&mut self, successful: u64, failed: u64, rolled_back: u64) {
        self.successful_attempts += successful;
        self.failed_attempts += failed;
        self.rollback_attempts += rolled_back;
        self.total_attempts += successful + failed + rolled_back;
        self.success_rate = if self.total_attempts > 0 {
            self.successful_attempts as f64 / self.total_attempts as f64 * 100.0
        } else {
            0.0
        };
        self.last_updated = Utc::now();
    }
}

/// Rolling per-vehicle flashing history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarFlashingHistory {
    pub car_id: String,
    pub car_type: String,
    pub total_flashing_sessions: u64,
    pub successful_sessions: u64,
    pub partial_success_sessions: u64,
    pub failed_sessions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_flashing_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_ecu_versions: BTreeMap<String, String>,
    /// Session ids in ingestion order
    #[serde(default)]
    pub flashing_sessions: Vec<String>,
}

impl CarFlashingHistory {
    pub fn new(car_id: impl Into<String>, car_type: impl Into<String>) -> Self {
        Self {
            car_id: car_id.into(),
            car_type: car_type.into(),
            total_flashing_sessions: 0,
            successful_sessions: 0,
            partial_success_sessions: 0,
            failed_sessions: 0,
            last_flashing_date: None,
            current_ecu_versions: BTreeMap::new(),
            flashing_sessions: Vec::new(),
        }
    }

    /// Fold one feedback report into the history
    pub fn record(&mut self, feedback: &FlashingFeedback) {
        self.total_flashing_sessions += 1;
        match feedback.overall_status {
            FlashingStatus::Completed => self.successful_sessions += 1,
            FlashingStatus::PartialFailure => self.partial_success_sessions += 1,
            FlashingStatus::Failed => self.failed_sessions += 1,
        }
        self.last_flashing_date = Some(match self.last_flashing_date {
            Some(prev) if prev > feedback.flashing_timestamp => prev,
            _ => feedback.flashing_timestamp,
        });
        for (ecu, version) in &feedback.final_ecu_versions {
            self.current_ecu_versions.insert(ecu.clone(), version.clone());
        }
        self.flashing_sessions.push(feedback.session_id.clone());
    }
}
