//! Per-connection protocol handler
//!
//! # State machine
//!
//! ```text
//! Connecting ──► AwaitingHandshake ──┬─► Authenticated ──► Servicing ──► Closed
//!                                    └─► Rejected
//! ```
//!
//! The first frame must be a HANDSHAKE naming car type, vehicle id and
//! service. A bad or unauthenticated handshake is answered with ERROR and
//! the connection closes. After authentication the handler answers an
//! implicit update check, then services messages in arrival order until
//! the peer disconnects, the idle timeout fires, or framing breaks.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use fota_core::{DownloadRequest, DownloadStatus, GatewayError, RequestStatus, ServiceType, Session};
use fota_proto::{
    ClientMessage, DownloadRequestPayload, FrameStream, HandshakeReply, HandshakeRequest,
    MessageError, ProtocolError, ServerMessage, UpdateResponse,
};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::context::ServerContext;
use crate::error::ConnectionError;
use crate::registry::SessionLease;

const INVALID_INITIAL_MESSAGE: &str = "Invalid initial message";
const MISSING_INFORMATION: &str = "Missing required information";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingHandshake,
    Authenticated,
    Servicing,
    Closed,
    Rejected,
}

pub struct ConnectionHandler<S> {
    ctx: Arc<ServerContext>,
    stream: FrameStream<S>,
    peer: SocketAddr,
    state: ConnectionState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(ctx: Arc<ServerContext>, io: S, peer: SocketAddr) -> Self {
        let stream = FrameStream::new(io)
            .with_max_frame_bytes(ctx.config.server.max_frame_bytes)
            .with_read_timeout(ctx.config.idle_timeout());
        Self {
            ctx,
            stream,
            peer,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the connection to completion and return its final state
    pub async fn run(mut self) -> ConnectionState {
        self.state = ConnectionState::AwaitingHandshake;

        let (mut session, lease) = match self.handshake().await {
            Ok(accepted) => accepted,
            Err(e) => {
                self.reject(e).await;
                return self.state;
            }
        };

        self.state = ConnectionState::Servicing;
        let result = self.service(&mut session, &lease).await;
        self.state = ConnectionState::Closed;

        match result {
            Ok(()) => debug!(car_id = %session.car_id, "Connection closed"),
            Err(e) => warn!(car_id = %session.car_id, error = %e, "Connection terminated"),
        }

        let _ = self.stream.shutdown().await;
        if !lease.is_owner() {
            info!(car_id = %session.car_id, "Session was superseded by a newer connection");
        }
        if let Err(e) = self.ctx.telemetry.record_session(&session).await {
            warn!(error = %e, "Failed to record session");
        }
        drop(lease);
        self.state
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    async fn handshake(&mut self) -> Result<(Session, SessionLease), ConnectionError> {
        let env = match self.stream.read_envelope().await {
            Ok(Some(env)) => env,
            Ok(None) => {
                return Err(ConnectionError::InvalidHandshake(
                    INVALID_INITIAL_MESSAGE.into(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let request = match ClientMessage::try_from(&env) {
            Ok(ClientMessage::Handshake(request)) => request,
            _ => return Err(ConnectionError::InvalidHandshake(INVALID_INITIAL_MESSAGE.into())),
        };

        let (car_type, car_id, service_type) = required_fields(&request)?;
        let service_type: ServiceType = service_type
            .parse()
            .map_err(|_| ConnectionError::InvalidHandshake("Invalid service type".into()))?;

        let entry = self
            .ctx
            .catalog
            .find_car_type(car_type)
            .await?
            .filter(|ct| ct.has_car_id(car_id));

        let metadata = Value::Object(request.metadata.clone());
        let Some(entry) = entry else {
            let mut session = Session::new(car_type, car_id, self.peer, service_type, metadata);
            session.status = RequestStatus::NonAuthenticated;
            if let Err(e) = self.ctx.telemetry.record_session(&session).await {
                warn!(error = %e, "Failed to record session");
            }
            warn!(car_type, car_id, "Authentication failed");
            return Err(ConnectionError::AuthenticationFailed);
        };

        let mut session = Session::new(&entry.name, car_id, self.peer, service_type, metadata);
        session.status = RequestStatus::Authenticated;
        let lease = self.ctx.registry.claim(session.clone())?;
        self.state = ConnectionState::Authenticated;

        info!(
            car_type = %entry.name,
            car_id,
            service = %service_type,
            "Vehicle authenticated"
        );
        self.send(&ServerMessage::Handshake(HandshakeReply::authenticated()))
            .await?;

        let reported = request.ecu_versions();
        self.update_check(&mut session, &lease, &reported).await?;
        Ok((session, lease))
    }

    async fn reject(&mut self, error: ConnectionError) {
        self.state = ConnectionState::Rejected;
        let message = match &error {
            ConnectionError::Protocol(_) | ConnectionError::Message(_) => {
                INVALID_INITIAL_MESSAGE.to_string()
            }
            ConnectionError::Gateway(_) => "Authentication unavailable".to_string(),
            other => other.to_string(),
        };
        warn!(peer = %self.peer, error = %error, "Handshake rejected");

        if !matches!(&error, ConnectionError::Protocol(e) if e.is_disconnect()) {
            let _ = self
                .stream
                .send(&ServerMessage::error(error.code(), message))
                .await;
        }
        let _ = self.stream.shutdown().await;
    }

    // =========================================================================
    // Servicing
    // =========================================================================

    async fn service(
        &mut self,
        session: &mut Session,
        lease: &SessionLease,
    ) -> Result<(), ConnectionError> {
        loop {
            let env = match self.stream.read_envelope().await {
                Ok(Some(env)) => env,
                Ok(None) => {
                    debug!("Peer closed connection");
                    return Ok(());
                }
                Err(ProtocolError::Timeout(_)) => {
                    info!(car_id = %session.car_id, "Idle timeout");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            match ClientMessage::try_from(&env) {
                Ok(msg) => {
                    if matches!(msg, ClientMessage::DownloadRequest(_)) {
                        session.metadata = env.payload;
                    }
                    self.dispatch(msg, session, lease).await?;
                }
                Err(e) => {
                    warn!(msg_type = %env.msg_type, error = %e, "Rejected message");
                    self.send(&ServerMessage::error(400, e.to_string())).await?;
                }
            }
        }
    }

    async fn dispatch(
        &mut self,
        msg: ClientMessage,
        session: &mut Session,
        lease: &SessionLease,
    ) -> Result<(), ConnectionError> {
        match msg {
            ClientMessage::UpdateCheck(check) => {
                self.update_check(session, lease, &check.versions()).await
            }
            ClientMessage::DownloadRequest(payload) => {
                self.download(session, lease, payload).await
            }
            ClientMessage::FlashingFeedback(payload) => {
                let ack = self.ctx.feedback.record(&payload.data).await;
                self.send(&ServerMessage::FlashingFeedbackAck(ack)).await
            }
            ClientMessage::MetricsRequest(request) => {
                let response = self.ctx.feedback.query(&request).await;
                self.send(&ServerMessage::MetricsResponse(response)).await
            }
            ClientMessage::Handshake(_)
            | ClientMessage::DownloadAck(_)
            | ClientMessage::ChunkAck(_) => {
                let err = MessageError::Unexpected(msg.message_type());
                warn!(error = %err, "Message out of sequence");
                self.send(&ServerMessage::error(400, err.to_string())).await
            }
        }
    }

    async fn update_check(
        &mut self,
        session: &mut Session,
        lease: &SessionLease,
        reported: &BTreeMap<String, String>,
    ) -> Result<(), ConnectionError> {
        set_status(session, lease, RequestStatus::ServiceInProgress);

        match self.ctx.updates.check(&session.car_type, reported).await {
            Ok(updates_needed) => {
                set_status(session, lease, RequestStatus::FinishedSuccessfully);
                self.send(&ServerMessage::UpdateResponse(UpdateResponse { updates_needed }))
                    .await
            }
            Err(e) => {
                warn!(error = %e, "Update check failed");
                set_status(session, lease, RequestStatus::Failed);
                self.send(&ServerMessage::error(e.code(), "Update check failed"))
                    .await
            }
        }
    }

    async fn download(
        &mut self,
        session: &mut Session,
        lease: &SessionLease,
        payload: DownloadRequestPayload,
    ) -> Result<(), ConnectionError> {
        set_status(session, lease, RequestStatus::ServiceInProgress);

        if payload.required_versions.is_empty() {
            set_status(session, lease, RequestStatus::Failed);
            return self
                .send(&ServerMessage::error(400, "No versions specified for download"))
                .await;
        }

        let car_type = match self.ctx.catalog.find_car_type(&session.car_type).await {
            Ok(Some(car_type)) => car_type,
            Ok(None) => {
                let e = ConnectionError::from(GatewayError::CarTypeNotFound(session.car_type.clone()));
                set_status(session, lease, RequestStatus::Failed);
                return self
                    .send(&ServerMessage::error(e.code(), "Download request failed"))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "Catalog unavailable for download");
                set_status(session, lease, RequestStatus::Failed);
                return self
                    .send(&ServerMessage::error(500, "Download request failed"))
                    .await;
            }
        };

        let request = DownloadRequest::new(
            &session.car_type,
            &session.car_id,
            self.peer,
            payload.required_versions,
            payload.old_versions,
            payload.file_offsets,
        );
        lease.publish_download(Some(&request));

        let ctx = Arc::clone(&self.ctx);
        let outcome = ctx
            .transfers
            .run(&mut self.stream, &car_type, request, |progress| {
                lease.publish_download(Some(progress));
            })
            .await;
        lease.publish_download(None);

        if let Err(e) = ctx.telemetry.record_download(&outcome.request).await {
            warn!(error = %e, "Failed to record download");
        }

        let status = if outcome.status() == DownloadStatus::FinishedSuccessfully {
            RequestStatus::FinishedSuccessfully
        } else {
            RequestStatus::Failed
        };
        set_status(session, lease, status);

        match outcome.error {
            None => Ok(()),
            Some(e) => {
                let sent = self
                    .send(&ServerMessage::error(500, "File transfer failed"))
                    .await;
                if e.is_fatal() {
                    Err(e)
                } else {
                    sent
                }
            }
        }
    }

    async fn send(&mut self, msg: &ServerMessage) -> Result<(), ConnectionError> {
        self.stream.send(msg).await.map_err(ConnectionError::from)
    }
}

fn required_fields(request: &HandshakeRequest) -> Result<(&str, &str, &str), ConnectionError> {
    fn field(value: &Option<String>) -> Option<&str> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
    match (
        field(&request.car_type),
        field(&request.car_id),
        field(&request.service_type),
    ) {
        (Some(car_type), Some(car_id), Some(service)) => Ok((car_type, car_id, service)),
        _ => Err(ConnectionError::InvalidHandshake(MISSING_INFORMATION.into())),
    }
}

fn set_status(session: &mut Session, lease: &SessionLease, status: RequestStatus) {
    session.status = status;
    lease.publish_session(session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use fota_core::{CarType, Ecu, Version};
    use fota_proto::{Envelope, ErrorPayload, MetricsRequest, UpdateCheck};
    use fota_store::{MemoryBlobStore, MemoryCatalog, MemoryTelemetryStore};
    use serde_json::json;
    use tokio::io::DuplexStream;

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new(vec![CarType {
            name: "ModelX".to_string(),
            model_number: "MX-100".to_string(),
            ecus: vec![Ecu {
                name: "Engine_Control_Module".to_string(),
                model_number: "ECM-1".to_string(),
                versions: ["1.0.0", "1.1.0", "1.2.0"]
                    .iter()
                    .map(|v| Version {
                        version_number: v.to_string(),
                        compatible_car_types: vec!["ModelX".to_string()],
                        location: format!("ecm_{}.hex", v),
                    })
                    .collect(),
            }],
            manufactured_count: 1,
            car_ids: vec!["MX2023-001".to_string()],
        }])
    }

    struct Harness {
        client: FrameStream<DuplexStream>,
        task: tokio::task::JoinHandle<ConnectionState>,
        ctx: Arc<ServerContext>,
        telemetry: Arc<MemoryTelemetryStore>,
    }

    fn connect(config: ServerConfig) -> Harness {
        let blobs = MemoryBlobStore::new();
        blobs.insert("ecm_1.2.0.hex", vec![0xAB; 8192]);
        let telemetry = Arc::new(MemoryTelemetryStore::new());
        let ctx = ServerContext::new(
            config,
            Arc::new(catalog()),
            Arc::new(blobs),
            telemetry.clone(),
        );
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let handler =
            ConnectionHandler::new(ctx.clone(), server_io, "127.0.0.1:40000".parse().unwrap());
        assert_eq!(handler.state(), ConnectionState::Connecting);
        Harness {
            client: FrameStream::new(client_io),
            task: tokio::spawn(handler.run()),
            ctx,
            telemetry,
        }
    }

    async fn recv(client: &mut FrameStream<DuplexStream>) -> ServerMessage {
        let env = client.read_envelope().await.unwrap().expect("frame");
        ServerMessage::try_from(&env).unwrap()
    }

    fn handshake(car_type: &str, car_id: &str) -> Envelope {
        Envelope::new(
            "HANDSHAKE",
            json!({
                "car_type": car_type,
                "car_id": car_id,
                "service_type": "checkingForUpdate",
                "metadata": {"ecu_versions": {"Engine_Control_Module": "1.0.0"}}
            }),
        )
    }

    fn expect_error(msg: ServerMessage) -> ErrorPayload {
        match msg {
            ServerMessage::Error(e) => e,
            other => panic!("expected ERROR, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_and_implicit_update_check() {
        let mut h = connect(ServerConfig::default());
        h.client.send(&handshake("modelx", "mx2023-001")).await.unwrap();

        assert_eq!(
            recv(&mut h.client).await,
            ServerMessage::Handshake(HandshakeReply::authenticated())
        );
        let ServerMessage::UpdateResponse(update) = recv(&mut h.client).await else {
            panic!("expected UPDATE_RESPONSE");
        };
        assert_eq!(update.updates_needed["Engine_Control_Module"], "1.2.0");
        assert_eq!(h.ctx.registry.len(), 1);

        drop(h.client);
        assert_eq!(h.task.await.unwrap(), ConnectionState::Closed);
        assert!(h.ctx.registry.is_empty());
        let sessions = h.telemetry.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].car_type, "ModelX");
        assert_eq!(sessions[0].status, RequestStatus::FinishedSuccessfully);
    }

    #[tokio::test]
    async fn test_wrong_car_id_is_401() {
        let mut h = connect(ServerConfig::default());
        h.client.send(&handshake("ModelX", "MY2023-001")).await.unwrap();
        let err = expect_error(recv(&mut h.client).await);
        assert_eq!(err.code, 401);
        assert_eq!(err.message, "Authentication failed");
        assert_eq!(h.task.await.unwrap(), ConnectionState::Rejected);
        assert!(h.client.read_envelope().await.unwrap().is_none());
        assert_eq!(h.telemetry.sessions()[0].status, RequestStatus::NonAuthenticated);
    }

    #[tokio::test]
    async fn test_missing_fields_is_400() {
        let mut h = connect(ServerConfig::default());
        h.client
            .send(&Envelope::new("HANDSHAKE", json!({"car_type": "ModelX"})))
            .await
            .unwrap();
        let err = expect_error(recv(&mut h.client).await);
        assert_eq!(err.code, 400);
        assert_eq!(err.message, MISSING_INFORMATION);
        assert_eq!(h.task.await.unwrap(), ConnectionState::Rejected);
    }

    #[tokio::test]
    async fn test_first_message_must_be_handshake() {
        let mut h = connect(ServerConfig::default());
        h.client
            .send(&ClientMessage::UpdateCheck(UpdateCheck::default()))
            .await
            .unwrap();
        let err = expect_error(recv(&mut h.client).await);
        assert_eq!(err.code, 400);
        assert_eq!(err.message, INVALID_INITIAL_MESSAGE);
    }

    #[tokio::test]
    async fn test_unknown_type_keeps_connection_open() {
        let mut h = connect(ServerConfig::default());
        h.client.send(&handshake("ModelX", "MX2023-001")).await.unwrap();
        recv(&mut h.client).await;
        recv(&mut h.client).await;

        h.client
            .send(&Envelope::new("REBOOT", json!({})))
            .await
            .unwrap();
        let err = expect_error(recv(&mut h.client).await);
        assert_eq!(err.code, 400);
        assert_eq!(err.message, "Unknown message type: REBOOT");

        h.client
            .send(&ClientMessage::ChunkAck(Default::default()))
            .await
            .unwrap();
        assert_eq!(expect_error(recv(&mut h.client).await).code, 400);

        h.client
            .send(&ClientMessage::MetricsRequest(MetricsRequest::default()))
            .await
            .unwrap();
        assert!(matches!(
            recv(&mut h.client).await,
            ServerMessage::MetricsResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_metrics_request_keeps_handshake_metadata() {
        let mut h = connect(ServerConfig::default());
        h.client.send(&handshake("ModelX", "MX2023-001")).await.unwrap();
        recv(&mut h.client).await;
        recv(&mut h.client).await;

        h.client
            .send(&ClientMessage::MetricsRequest(MetricsRequest::default()))
            .await
            .unwrap();
        recv(&mut h.client).await;

        drop(h.client);
        assert_eq!(h.task.await.unwrap(), ConnectionState::Closed);
        assert_eq!(
            h.telemetry.sessions()[0].metadata,
            json!({"ecu_versions": {"Engine_Control_Module": "1.0.0"}})
        );
    }

    #[tokio::test]
    async fn test_empty_download_request_is_400() {
        let mut h = connect(ServerConfig::default());
        h.client.send(&handshake("ModelX", "MX2023-001")).await.unwrap();
        recv(&mut h.client).await;
        recv(&mut h.client).await;

        h.client
            .send(&ClientMessage::DownloadRequest(Default::default()))
            .await
            .unwrap();
        let err = expect_error(recv(&mut h.client).await);
        assert_eq!(err.code, 400);
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected_when_configured() {
        let mut config = ServerConfig::default();
        config.server.reject_duplicate_sessions = true;
        let mut first = connect(config);
        first.client.send(&handshake("ModelX", "MX2023-001")).await.unwrap();
        recv(&mut first.client).await;
        recv(&mut first.client).await;

        // Second connection against the same context
        let (server_io, client_io) = tokio::io::duplex(4096);
        let handler = ConnectionHandler::new(
            first.ctx.clone(),
            server_io,
            "127.0.0.1:40001".parse().unwrap(),
        );
        let task = tokio::spawn(handler.run());
        let mut second = FrameStream::new(client_io);
        second.send(&handshake("ModelX", "MX2023-001")).await.unwrap();
        let err = expect_error(recv(&mut second).await);
        assert_eq!(err.code, 409);
        assert_eq!(task.await.unwrap(), ConnectionState::Rejected);
        assert_eq!(first.ctx.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes() {
        let mut config = ServerConfig::default();
        config.server.idle_timeout_secs = 1;
        let mut h = connect(config);
        h.client.send(&handshake("ModelX", "MX2023-001")).await.unwrap();
        recv(&mut h.client).await;
        recv(&mut h.client).await;

        assert_eq!(h.task.await.unwrap(), ConnectionState::Closed);
        assert!(h.client.read_envelope().await.unwrap().is_none());
    }

    #[test]
    fn test_required_fields_trimmed() {
        let request = HandshakeRequest {
            car_type: Some("ModelX".into()),
            car_id: Some("  ".into()),
            service_type: Some("checkingForUpdate".into()),
            ..Default::default()
        };
        assert!(required_fields(&request).is_err());

        let request = HandshakeRequest {
            car_type: Some(" ModelX ".into()),
            car_id: Some("MX2023-001\n".into()),
            service_type: Some("checkingForUpdate".into()),
            ..Default::default()
        };
        assert_eq!(
            required_fields(&request).unwrap(),
            ("ModelX", "MX2023-001", "checkingForUpdate")
        );
    }
}
