//! Download request model for resumable multi-file transfers

use std::collections::BTreeMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a download request.
///
/// # Lifecycle
///
/// ```text
/// PreparingFiles → SendingInProgress ─┬─► FinishedSuccessfully
///                                     ├─► FailedPartialSuccess
///                                     └─► AllFailed
/// ```
///
/// Transitions only move forward; the three outcomes are terminal.
/// `PreparingFiles` may jump straight to `AllFailed` when the transfer
/// never starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    #[serde(rename = "preparingFiles", alias = "PREPARING_FILES")]
    PreparingFiles,
    #[serde(rename = "sendingInProgress", alias = "SENDING_IN_PROGRESS")]
    SendingInProgress,
    #[serde(rename = "finishedSuccessfully", alias = "FINISHED_SUCCESSFULLY")]
    FinishedSuccessfully,
    #[serde(
        rename = "failedWithSomeFilesSendSuccessfully",
        alias = "FAILED_PARTIAL_SUCCESS"
    )]
    FailedPartialSuccess,
    #[serde(rename = "allFailed", alias = "ALL_FAILED")]
    AllFailed,
}

impl DownloadStatus {
    fn rank(self) -> u8 {
        match self {
            DownloadStatus::PreparingFiles => 0,
            DownloadStatus::SendingInProgress => 1,
            DownloadStatus::FinishedSuccessfully
            | DownloadStatus::FailedPartialSuccess
            | DownloadStatus::AllFailed => 2,
        }
    }

    /// Whether `next` is a legal forward transition from `self`
    pub fn can_advance_to(self, next: DownloadStatus) -> bool {
        next.rank() > self.rank()
    }

    /// Final outcome from the number of fully transferred files
    pub fn from_counts(successful: usize, requested: usize) -> Self {
        if requested > 0 && successful == requested {
            DownloadStatus::FinishedSuccessfully
        } else if successful == 0 {
            DownloadStatus::AllFailed
        } else {
            DownloadStatus::FailedPartialSuccess
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DownloadStatus::PreparingFiles => "preparingFiles",
            DownloadStatus::SendingInProgress => "sendingInProgress",
            DownloadStatus::FinishedSuccessfully => "finishedSuccessfully",
            DownloadStatus::FailedPartialSuccess => "failedWithSomeFilesSendSuccessfully",
            DownloadStatus::AllFailed => "allFailed",
        };
        f.write_str(s)
    }
}

/// Attempted backwards or post-terminal transition
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid download status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: DownloadStatus,
    pub to: DownloadStatus,
}

/// A multi-file download driven by one transfer engine run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub timestamp: DateTime<Utc>,
    pub car_type: String,
    pub car_id: String,
    pub peer: SocketAddr,
    /// ECU name -> version to deliver
    pub required_versions: BTreeMap<String, String>,
    /// ECU name -> version installed before the update
    #[serde(default)]
    pub old_versions: BTreeMap<String, String>,
    /// ECU name -> byte offset to resume from
    #[serde(default)]
    pub file_offsets: BTreeMap<String, u64>,
    pub total_size: u64,
    /// Bytes sent and acknowledged; never decreases
    pub transferred_size: u64,
    /// ECU name -> whether its file is currently being streamed
    #[serde(default)]
    pub active_transfers: BTreeMap<String, bool>,
    status: DownloadStatus,
}

impl DownloadRequest {
    pub fn new(
        car_type: impl Into<String>,
        car_id: impl Into<String>,
        peer: SocketAddr,
        required_versions: BTreeMap<String, String>,
        old_versions: BTreeMap<String, String>,
        file_offsets: BTreeMap<String, u64>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            car_type: car_type.into(),
            car_id: car_id.into(),
            peer,
            required_versions,
            old_versions,
            file_offsets,
            total_size: 0,
            transferred_size: 0,
            active_transfers: BTreeMap::new(),
            status: DownloadStatus::PreparingFiles,
        }
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    /// Move the status forward. Backward and post-terminal moves are refused.
    pub fn advance(&mut self, next: DownloadStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Resume offset requested for an ECU (0 when absent). An exact name
    /// match wins over a case-insensitive one.
    pub fn offset_for(&self, ecu_name: &str) -> u64 {
        self.file_offsets.get(ecu_name).copied().unwrap_or_else(|| {
            self.file_offsets
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(ecu_name))
                .map(|(_, offset)| *offset)
                .unwrap_or(0)
        })
    }

    pub fn set_active(&mut self, ecu_name: &str, active: bool) {
        self.active_transfers.insert(ecu_name.to_string(), active);
    }

    /// Account for an acknowledged chunk. Saturates at `total_size`.
    pub fn record_chunk(&mut self, len: u64) {
        self.transferred_size = self.transferred_size.saturating_add(len).min(self.total_size);
    }

    /// Transfer progress in percent (0.0 - 100.0)
    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        (self.transferred_size as f64 / self.total_size as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> DownloadRequest {
        let mut required = BTreeMap::new();
        required.insert("ECM".to_string(), "1.2.0".to_string());
        let mut offsets = BTreeMap::new();
        offsets.insert("ECM".to_string(), 4096);
        DownloadRequest::new(
            "ModelX",
            "MX2023-001",
            "127.0.0.1:4000".parse().unwrap(),
            required,
            BTreeMap::new(),
            offsets,
        )
    }

    #[test]
    fn test_status_from_counts() {
        assert_eq!(
            DownloadStatus::from_counts(3, 3),
            DownloadStatus::FinishedSuccessfully
        );
        assert_eq!(
            DownloadStatus::from_counts(1, 3),
            DownloadStatus::FailedPartialSuccess
        );
        assert_eq!(DownloadStatus::from_counts(0, 3), DownloadStatus::AllFailed);
    }

    #[test]
    fn test_status_is_forward_only() {
        let mut req = request();
        assert!(req.advance(DownloadStatus::SendingInProgress).is_ok());
        assert!(req.advance(DownloadStatus::PreparingFiles).is_err());
        assert!(req.advance(DownloadStatus::FailedPartialSuccess).is_ok());
        assert!(req.advance(DownloadStatus::FinishedSuccessfully).is_err());
        assert_eq!(req.status(), DownloadStatus::FailedPartialSuccess);
    }

    #[test]
    fn test_preparing_can_fail_directly() {
        let mut req = request();
        assert!(req.advance(DownloadStatus::AllFailed).is_ok());
    }

    #[test]
    fn test_transferred_size_saturates_at_total() {
        let mut req = request();
        req.total_size = 8192;
        req.record_chunk(4096);
        req.record_chunk(8192);
        assert_eq!(req.transferred_size, 8192);
        assert_eq!(req.percent(), 100.0);
    }

    #[test]
    fn test_offset_lookup() {
        let req = request();
        assert_eq!(req.offset_for("ECM"), 4096);
        assert_eq!(req.offset_for("ecm"), 4096);
        assert_eq!(req.offset_for("TCM"), 0);
    }

    #[test]
    fn test_status_wire_names() {
        let s = serde_json::to_string(&DownloadStatus::FailedPartialSuccess).unwrap();
        assert_eq!(s, "\"failedWithSomeFilesSendSuccessfully\"");
        let parsed: DownloadStatus = serde_json::from_str("\"FINISHED_SUCCESSFULLY\"").unwrap();
        assert_eq!(parsed, DownloadStatus::FinishedSuccessfully);
    }
}
