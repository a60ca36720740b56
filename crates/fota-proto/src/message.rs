//! Message types and typed payloads
//!
//! Every frame carries an [`Envelope`] (`{type, payload}`). The server
//! decodes envelopes into [`ClientMessage`] and the vehicle side decodes
//! them into [`ServerMessage`]; both enums are closed, so dispatch over
//! them is checked for exhaustiveness.
//!
//! HANDSHAKE travels in both directions with different payload shapes,
//! which is why the two directions get separate enums.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fota_core::DownloadStatus;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{MessageError, ProtocolError};

// =============================================================================
// Message type tags
// =============================================================================

/// Closed set of wire type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Handshake,
    UpdateCheck,
    UpdateResponse,
    DownloadRequest,
    DownloadStart,
    DownloadAck,
    FileChunk,
    ChunkAck,
    DownloadComplete,
    Error,
    FlashingFeedback,
    FlashingFeedbackAck,
    ServerMetricsRequest,
    ServerMetricsResponse,
}

impl MessageType {
    pub const ALL: [MessageType; 14] = [
        MessageType::Handshake,
        MessageType::UpdateCheck,
        MessageType::UpdateResponse,
        MessageType::DownloadRequest,
        MessageType::DownloadStart,
        MessageType::DownloadAck,
        MessageType::FileChunk,
        MessageType::ChunkAck,
        MessageType::DownloadComplete,
        MessageType::Error,
        MessageType::FlashingFeedback,
        MessageType::FlashingFeedbackAck,
        MessageType::ServerMetricsRequest,
        MessageType::ServerMetricsResponse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Handshake => "HANDSHAKE",
            MessageType::UpdateCheck => "UPDATE_CHECK",
            MessageType::UpdateResponse => "UPDATE_RESPONSE",
            MessageType::DownloadRequest => "DOWNLOAD_REQUEST",
            MessageType::DownloadStart => "DOWNLOAD_START",
            MessageType::DownloadAck => "DOWNLOAD_ACK",
            MessageType::FileChunk => "FILE_CHUNK",
            MessageType::ChunkAck => "CHUNK_ACK",
            MessageType::DownloadComplete => "DOWNLOAD_COMPLETE",
            MessageType::Error => "ERROR",
            MessageType::FlashingFeedback => "FLASHING_FEEDBACK",
            MessageType::FlashingFeedbackAck => "FLASHING_FEEDBACK_ACK",
            MessageType::ServerMetricsRequest => "SERVER_METRICS_REQUEST",
            MessageType::ServerMetricsResponse => "SERVER_METRICS_RESPONSE",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MessageError::UnknownType(s.to_string()))
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Raw `{type, payload}` frame body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
        }
    }

    /// Build an envelope from a typed payload
    pub fn typed<T: Serialize>(msg_type: MessageType, payload: &T) -> Result<Self, ProtocolError> {
        let payload =
            serde_json::to_value(payload).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self::new(msg_type.as_str(), payload))
    }

    /// Resolve the type tag against the closed set
    pub fn message_type(&self) -> Result<MessageType, MessageError> {
        self.msg_type.parse()
    }

    fn payload_as<T: DeserializeOwned>(&self, msg_type: MessageType) -> Result<T, MessageError> {
        let value = match &self.payload {
            Value::Null => empty_object(),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| MessageError::InvalidPayload {
            msg_type,
            reason: e.to_string(),
        })
    }
}

/// Anything that can be written as a frame
pub trait ToEnvelope {
    fn to_envelope(&self) -> Result<Envelope, ProtocolError>;
}

impl ToEnvelope for Envelope {
    fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        Ok(self.clone())
    }
}

// =============================================================================
// Vehicle -> server payloads
// =============================================================================

/// HANDSHAKE sent by the vehicle. Fields are optional at the type level so
/// that a missing field is reported as a rejected handshake, not a decode
/// failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl HandshakeRequest {
    /// `metadata.ecu_versions` as a string map; non-string values are skipped
    pub fn ecu_versions(&self) -> BTreeMap<String, String> {
        string_map(self.metadata.get("ecu_versions"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateCheckMetadata {
    #[serde(default, deserialize_with = "lenient_versions")]
    pub ecu_versions: BTreeMap<String, String>,
}

/// UPDATE_CHECK: either `{ecu_versions}` or `{metadata: {ecu_versions}}`.
/// Non-string versions are skipped, as in the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateCheck {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_optional_versions"
    )]
    pub ecu_versions: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<UpdateCheckMetadata>,
}

impl UpdateCheck {
    pub fn new(ecu_versions: BTreeMap<String, String>) -> Self {
        Self {
            ecu_versions: Some(ecu_versions),
            metadata: None,
        }
    }

    /// Reported versions; the top-level map wins over `metadata`
    pub fn versions(&self) -> BTreeMap<String, String> {
        match (&self.ecu_versions, &self.metadata) {
            (Some(v), _) => v.clone(),
            (None, Some(m)) => m.ecu_versions.clone(),
            (None, None) => BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequestPayload {
    #[serde(default)]
    pub required_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub old_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub file_offsets: BTreeMap<String, u64>,
}

/// DOWNLOAD_ACK; any payload is accepted and ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadAck {}

/// CHUNK_ACK; fields, when present, must match the chunk being acknowledged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecu_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl ChunkAck {
    pub fn for_chunk(ecu_name: impl Into<String>, offset: u64) -> Self {
        Self {
            ecu_name: Some(ecu_name.into()),
            offset: Some(offset),
        }
    }

    /// Whether this ack acknowledges the chunk `(ecu_name, offset)`
    pub fn matches(&self, ecu_name: &str, offset: u64) -> bool {
        self.ecu_name.as_deref().map_or(true, |n| n == ecu_name)
            && self.offset.map_or(true, |o| o == offset)
    }
}

/// Feedback fields as reported by the vehicle. All optional; presence is
/// checked by the ingestor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flashing_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ecus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_ecus: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_ecus: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_ecu_versions: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beaglebone_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlashingFeedbackPayload {
    #[serde(default)]
    pub data: FeedbackData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_type_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_car_id: Option<String>,
}

// =============================================================================
// Server -> vehicle payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReply {
    pub status: String,
    pub message: String,
}

impl HandshakeReply {
    pub fn authenticated() -> Self {
        Self {
            status: "authenticated".to_string(),
            message: "Connection established".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    #[serde(default)]
    pub updates_needed: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadStart {
    pub total_size: u64,
    /// ECU name -> full image size
    pub files: BTreeMap<String, u64>,
    /// ECU name -> offset the transfer starts from
    pub file_offsets: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
    pub ecu_name: String,
    pub offset: u64,
    /// Lowercase hex of the chunk bytes
    pub data: String,
}

impl FileChunk {
    pub fn new(ecu_name: impl Into<String>, offset: u64, bytes: &[u8]) -> Self {
        Self {
            ecu_name: ecu_name.into(),
            offset,
            data: hex::encode(bytes),
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadComplete {
    pub status: DownloadStatus,
    pub successful_transfers: usize,
    pub total_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashingFeedbackAck {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub metrics: Value,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Directional message enums
// =============================================================================

/// Messages a vehicle sends to the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Handshake(HandshakeRequest),
    UpdateCheck(UpdateCheck),
    DownloadRequest(DownloadRequestPayload),
    DownloadAck(DownloadAck),
    ChunkAck(ChunkAck),
    FlashingFeedback(FlashingFeedbackPayload),
    MetricsRequest(MetricsRequest),
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::Handshake(_) => MessageType::Handshake,
            ClientMessage::UpdateCheck(_) => MessageType::UpdateCheck,
            ClientMessage::DownloadRequest(_) => MessageType::DownloadRequest,
            ClientMessage::DownloadAck(_) => MessageType::DownloadAck,
            ClientMessage::ChunkAck(_) => MessageType::ChunkAck,
            ClientMessage::FlashingFeedback(_) => MessageType::FlashingFeedback,
            ClientMessage::MetricsRequest(_) => MessageType::ServerMetricsRequest,
        }
    }
}

impl TryFrom<&Envelope> for ClientMessage {
    type Error = MessageError;

    fn try_from(env: &Envelope) -> Result<Self, Self::Error> {
        let t = env.message_type()?;
        Ok(match t {
            MessageType::Handshake => ClientMessage::Handshake(env.payload_as(t)?),
            MessageType::UpdateCheck => ClientMessage::UpdateCheck(env.payload_as(t)?),
            MessageType::DownloadRequest => ClientMessage::DownloadRequest(env.payload_as(t)?),
            MessageType::DownloadAck => ClientMessage::DownloadAck(env.payload_as(t)?),
            MessageType::ChunkAck => ClientMessage::ChunkAck(env.payload_as(t)?),
            MessageType::FlashingFeedback => ClientMessage::FlashingFeedback(env.payload_as(t)?),
            MessageType::ServerMetricsRequest => ClientMessage::MetricsRequest(env.payload_as(t)?),
            MessageType::UpdateResponse
            | MessageType::DownloadStart
            | MessageType::FileChunk
            | MessageType::DownloadComplete
            | MessageType::Error
            | MessageType::FlashingFeedbackAck
            | MessageType::ServerMetricsResponse => return Err(MessageError::Unexpected(t)),
        })
    }
}

impl ToEnvelope for ClientMessage {
    fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let t = self.message_type();
        match self {
            ClientMessage::Handshake(p) => Envelope::typed(t, p),
            ClientMessage::UpdateCheck(p) => Envelope::typed(t, p),
            ClientMessage::DownloadRequest(p) => Envelope::typed(t, p),
            ClientMessage::DownloadAck(p) => Envelope::typed(t, p),
            ClientMessage::ChunkAck(p) => Envelope::typed(t, p),
            ClientMessage::FlashingFeedback(p) => Envelope::typed(t, p),
            ClientMessage::MetricsRequest(p) => Envelope::typed(t, p),
        }
    }
}

/// Messages the server sends to a vehicle
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Handshake(HandshakeReply),
    UpdateResponse(UpdateResponse),
    DownloadStart(DownloadStart),
    FileChunk(FileChunk),
    DownloadComplete(DownloadComplete),
    Error(ErrorPayload),
    FlashingFeedbackAck(FlashingFeedbackAck),
    MetricsResponse(MetricsResponse),
}

impl ServerMessage {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload::new(code, message))
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::Handshake(_) => MessageType::Handshake,
            ServerMessage::UpdateResponse(_) => MessageType::UpdateResponse,
            ServerMessage::DownloadStart(_) => MessageType::DownloadStart,
            ServerMessage::FileChunk(_) => MessageType::FileChunk,
            ServerMessage::DownloadComplete(_) => MessageType::DownloadComplete,
            ServerMessage::Error(_) => MessageType::Error,
            ServerMessage::FlashingFeedbackAck(_) => MessageType::FlashingFeedbackAck,
            ServerMessage::MetricsResponse(_) => MessageType::ServerMetricsResponse,
        }
    }
}

impl TryFrom<&Envelope> for ServerMessage {
    type Error = MessageError;

    fn try_from(env: &Envelope) -> Result<Self, MessageError> {
        let t = env.message_type()?;
        Ok(match t {
            MessageType::Handshake => ServerMessage::Handshake(env.payload_as(t)?),
            MessageType::UpdateResponse => ServerMessage::UpdateResponse(env.payload_as(t)?),
            MessageType::DownloadStart => ServerMessage::DownloadStart(env.payload_as(t)?),
            MessageType::FileChunk => ServerMessage::FileChunk(env.payload_as(t)?),
            MessageType::DownloadComplete => ServerMessage::DownloadComplete(env.payload_as(t)?),
            MessageType::Error => ServerMessage::Error(env.payload_as(t)?),
            MessageType::FlashingFeedbackAck => {
                ServerMessage::FlashingFeedbackAck(env.payload_as(t)?)
            }
            MessageType::ServerMetricsResponse => {
                ServerMessage::MetricsResponse(env.payload_as(t)?)
            }
            MessageType::UpdateCheck
            | MessageType::DownloadRequest
            | MessageType::DownloadAck
            | MessageType::ChunkAck
            | MessageType::FlashingFeedback
            | MessageType::ServerMetricsRequest => return Err(MessageError::Unexpected(t)),
        })
    }
}

impl ToEnvelope for ServerMessage {
    fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let t = self.message_type();
        match self {
            ServerMessage::Handshake(p) => Envelope::typed(t, p),
            ServerMessage::UpdateResponse(p) => Envelope::typed(t, p),
            ServerMessage::DownloadStart(p) => Envelope::typed(t, p),
            ServerMessage::FileChunk(p) => Envelope::typed(t, p),
            ServerMessage::DownloadComplete(p) => Envelope::typed(t, p),
            ServerMessage::Error(p) => Envelope::typed(t, p),
            ServerMessage::FlashingFeedbackAck(p) => Envelope::typed(t, p),
            ServerMessage::MetricsResponse(p) => Envelope::typed(t, p),
        }
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn lenient_versions<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(string_map(value.as_ref()))
}

fn lenient_optional_versions<'de, D>(
    deserializer: D,
) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(value @ Value::Object(_)) => Ok(Some(string_map(Some(&value)))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_message_type_names() {
        for t in MessageType::ALL {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
        assert!(matches!(
            "REBOOT".parse::<MessageType>(),
            Err(MessageError::UnknownType(s)) if s == "REBOOT"
        ));
    }

    #[test]
    fn test_handshake_with_missing_fields_still_decodes() {
        let env = Envelope::new("HANDSHAKE", json!({"car_type": "ModelX"}));
        let msg = ClientMessage::try_from(&env).unwrap();
        match msg {
            ClientMessage::Handshake(h) => {
                assert_eq!(h.car_type.as_deref(), Some("ModelX"));
                assert!(h.car_id.is_none());
                assert!(h.ecu_versions().is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_handshake_ecu_versions() {
        let env = Envelope::new(
            "HANDSHAKE",
            json!({
                "car_type": "ModelX",
                "car_id": "MX2023-001",
                "service_type": "checkingForUpdate",
                "metadata": {"ecu_versions": {"Engine_Control_Module": "1.0.0", "bad": 3}}
            }),
        );
        let ClientMessage::Handshake(h) = ClientMessage::try_from(&env).unwrap() else {
            panic!("expected handshake");
        };
        let versions = h.ecu_versions();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions["Engine_Control_Module"], "1.0.0");
    }

    #[test]
    fn test_update_check_accepts_both_shapes() {
        let flat = Envelope::new("UPDATE_CHECK", json!({"ecu_versions": {"ECM": "1.0"}}));
        let nested = Envelope::new(
            "UPDATE_CHECK",
            json!({"metadata": {"ecu_versions": {"ECM": "1.0"}}}),
        );
        for env in [flat, nested] {
            let ClientMessage::UpdateCheck(uc) = ClientMessage::try_from(&env).unwrap() else {
                panic!("expected update check");
            };
            assert_eq!(uc.versions()["ECM"], "1.0");
        }
    }

    #[test]
    fn test_update_check_skips_non_string_versions() {
        for payload in [
            json!({"ecu_versions": {"ECM": "1.0", "TCM": 2, "BCM": null}}),
            json!({"metadata": {"ecu_versions": {"ECM": "1.0", "TCM": [2]}}}),
        ] {
            let env = Envelope::new("UPDATE_CHECK", payload);
            let ClientMessage::UpdateCheck(uc) = ClientMessage::try_from(&env).unwrap() else {
                panic!("expected update check");
            };
            let versions = uc.versions();
            assert_eq!(versions.len(), 1);
            assert_eq!(versions["ECM"], "1.0");
        }
    }

    #[test]
    fn test_invalid_payload_is_reported() {
        let env = Envelope::new("DOWNLOAD_REQUEST", json!({"file_offsets": {"ECM": "four"}}));
        let err = ClientMessage::try_from(&env).unwrap_err();
        assert!(matches!(
            err,
            MessageError::InvalidPayload { msg_type: MessageType::DownloadRequest, .. }
        ));
    }

    #[test]
    fn test_server_only_type_from_client_is_unexpected() {
        let env = Envelope::new("FILE_CHUNK", json!({}));
        assert!(matches!(
            ClientMessage::try_from(&env),
            Err(MessageError::Unexpected(MessageType::FileChunk))
        ));
    }

    #[test]
    fn test_download_ack_ignores_payload() {
        let env = Envelope::new("DOWNLOAD_ACK", json!({"anything": [1, 2, 3]}));
        assert_eq!(
            ClientMessage::try_from(&env).unwrap(),
            ClientMessage::DownloadAck(DownloadAck {})
        );
        let null = Envelope::new("DOWNLOAD_ACK", Value::Null);
        assert!(ClientMessage::try_from(&null).is_ok());
    }

    #[test]
    fn test_chunk_ack_matching() {
        assert!(ChunkAck::default().matches("ECM", 0));
        assert!(ChunkAck::for_chunk("ECM", 8192).matches("ECM", 8192));
        assert!(!ChunkAck::for_chunk("ECM", 0).matches("ECM", 8192));
        assert!(!ChunkAck::for_chunk("TCM", 0).matches("ECM", 0));
    }

    #[test]
    fn test_file_chunk_hex() {
        let chunk = FileChunk::new("ECM", 0, &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(chunk.data, "deadbeef");
        assert_eq!(chunk.bytes().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_download_complete_wire_shape() {
        let msg = ServerMessage::DownloadComplete(DownloadComplete {
            status: DownloadStatus::FinishedSuccessfully,
            successful_transfers: 1,
            total_files: 1,
        });
        let env = msg.to_envelope().unwrap();
        assert_eq!(env.msg_type, "DOWNLOAD_COMPLETE");
        assert_eq!(
            env.payload,
            json!({"status": "finishedSuccessfully", "successful_transfers": 1, "total_files": 1})
        );
        assert_eq!(ServerMessage::try_from(&env).unwrap(), msg);
    }
}
