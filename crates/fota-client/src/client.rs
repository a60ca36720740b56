//! Vehicle-side protocol client

use std::collections::BTreeMap;
use std::time::Duration;

use fota_core::ServiceType;
use fota_proto::{
    ChunkAck, ClientMessage, DownloadAck, DownloadComplete, DownloadRequestPayload,
    DownloadStart, Envelope, FeedbackData, FileChunk, FlashingFeedbackAck,
    FlashingFeedbackPayload, FrameStream, HandshakeReply, HandshakeRequest, MessageType,
    MetricsRequest, MetricsResponse, ServerMessage, ToEnvelope, UpdateCheck,
};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, instrument, warn};

use crate::error::{ClientError, Result};

/// Default wait for any single server reply
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What to answer a received chunk with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAction {
    /// Acknowledge and keep the bytes
    Ack,
    /// Answer with a mismatched ack; the server abandons the file
    Reject,
}

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub struct Handshake {
    pub reply: HandshakeReply,
    /// Outcome of the implicit update check
    pub updates_needed: BTreeMap<String, String>,
}

/// Result of a download exchange
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub start: DownloadStart,
    /// Bytes received per ECU, beginning at the announced start offset
    pub files: BTreeMap<String, Vec<u8>>,
    /// ECUs whose transfer this client rejected
    pub rejected: Vec<String>,
    pub complete: DownloadComplete,
}

/// FOTA protocol client
///
/// Generic over the byte transport so tests can run it over an in-memory
/// duplex; [`FotaClient::connect`] gives the TCP flavour.
pub struct FotaClient<S = TcpStream> {
    stream: FrameStream<S>,
}

impl FotaClient<TcpStream> {
    /// Connect to a FOTA server
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_TIMEOUT).await
    }

    /// Connect with a custom reply timeout
    pub async fn connect_with_timeout(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        if let Ok(peer) = socket.peer_addr() {
            info!(%peer, "Connected to FOTA server");
        }
        Ok(Self::with_timeout(socket, timeout))
    }
}

impl<S> FotaClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established transport
    pub fn new(io: S) -> Self {
        Self::with_timeout(io, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(io: S, timeout: Duration) -> Self {
        Self {
            stream: FrameStream::new(io).with_read_timeout(timeout),
        }
    }

    // =========================================================================
    // Handshake / update check
    // =========================================================================

    /// Authenticate and collect the implicit update check
    #[instrument(skip(self, ecu_versions))]
    pub async fn handshake(
        &mut self,
        car_type: &str,
        car_id: &str,
        service: ServiceType,
        ecu_versions: &BTreeMap<String, String>,
    ) -> Result<Handshake> {
        let mut metadata = Map::new();
        metadata.insert(
            "ecu_versions".to_string(),
            serde_json::to_value(ecu_versions).unwrap_or_default(),
        );
        self.handshake_with(HandshakeRequest {
            car_type: Some(car_type.to_string()),
            car_id: Some(car_id.to_string()),
            service_type: Some(service.to_string()),
            metadata,
        })
        .await
    }

    /// Send an arbitrary HANDSHAKE payload
    pub async fn handshake_with(&mut self, request: HandshakeRequest) -> Result<Handshake> {
        self.send(&ClientMessage::Handshake(request)).await?;

        let reply = match self.recv().await? {
            ServerMessage::Handshake(reply) => reply,
            other => return Err(unexpected(MessageType::Handshake, other)),
        };
        let updates_needed = match self.recv().await? {
            ServerMessage::UpdateResponse(update) => update.updates_needed,
            other => return Err(unexpected(MessageType::UpdateResponse, other)),
        };

        debug!(updates = updates_needed.len(), "Handshake complete");
        Ok(Handshake {
            reply,
            updates_needed,
        })
    }

    /// ECUs whose reported version is behind the catalog, with the version to install
    #[instrument(skip(self, ecu_versions))]
    pub async fn check_for_updates(
        &mut self,
        ecu_versions: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        self.send(&ClientMessage::UpdateCheck(UpdateCheck::new(
            ecu_versions.clone(),
        )))
        .await?;

        match self.recv().await? {
            ServerMessage::UpdateResponse(update) => Ok(update.updates_needed),
            other => Err(unexpected(MessageType::UpdateResponse, other)),
        }
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Request images and receive them chunk by chunk.
    ///
    /// `on_chunk` sees every chunk before it is acknowledged; returning
    /// [`ChunkAction::Reject`] makes the server abandon that file.
    #[instrument(skip(self, request, on_chunk), fields(files = request.required_versions.len()))]
    pub async fn download<F>(
        &mut self,
        request: DownloadRequestPayload,
        mut on_chunk: F,
    ) -> Result<DownloadResult>
    where
        F: FnMut(&FileChunk) -> ChunkAction,
    {
        self.send(&ClientMessage::DownloadRequest(request)).await?;

        let start = match self.recv().await? {
            ServerMessage::DownloadStart(start) => start,
            other => return Err(unexpected(MessageType::DownloadStart, other)),
        };
        info!(
            total_size = start.total_size,
            files = start.files.len(),
            "Download started"
        );
        self.send(&ClientMessage::DownloadAck(DownloadAck {})).await?;

        let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut rejected = Vec::new();
        loop {
            match self.recv().await? {
                ServerMessage::FileChunk(chunk) => {
                    let bytes = chunk.bytes().map_err(|_| ClientError::InvalidChunk {
                        ecu_name: chunk.ecu_name.clone(),
                        offset: chunk.offset,
                    })?;

                    let ack = match on_chunk(&chunk) {
                        ChunkAction::Ack => {
                            files
                                .entry(chunk.ecu_name.clone())
                                .or_default()
                                .extend_from_slice(&bytes);
                            ChunkAck::for_chunk(&chunk.ecu_name, chunk.offset)
                        }
                        ChunkAction::Reject => {
                            warn!(ecu = %chunk.ecu_name, offset = chunk.offset, "Rejecting chunk");
                            files.remove(&chunk.ecu_name);
                            rejected.push(chunk.ecu_name.clone());
                            // No chunk is ever sent at this offset
                            ChunkAck::for_chunk(&chunk.ecu_name, u64::MAX)
                        }
                    };
                    self.send(&ClientMessage::ChunkAck(ack)).await?;
                }
                ServerMessage::DownloadComplete(complete) => {
                    info!(
                        status = %complete.status,
                        successful = complete.successful_transfers,
                        total = complete.total_files,
                        "Download complete"
                    );
                    return Ok(DownloadResult {
                        start,
                        files,
                        rejected,
                        complete,
                    });
                }
                other => return Err(unexpected(MessageType::DownloadComplete, other)),
            }
        }
    }

    // =========================================================================
    // Feedback / metrics
    // =========================================================================

    /// Report the outcome of a flashing session
    #[instrument(skip(self, data), fields(session_id = ?data.session_id))]
    pub async fn send_feedback(&mut self, data: FeedbackData) -> Result<FlashingFeedbackAck> {
        self.send(&ClientMessage::FlashingFeedback(FlashingFeedbackPayload { data }))
            .await?;

        match self.recv().await? {
            ServerMessage::FlashingFeedbackAck(ack) => Ok(ack),
            other => Err(unexpected(MessageType::FlashingFeedbackAck, other)),
        }
    }

    #[instrument(skip(self))]
    pub async fn query_metrics(&mut self, request: MetricsRequest) -> Result<Value> {
        Ok(self.query_metrics_raw(request).await?.metrics)
    }

    /// Like [`query_metrics`](Self::query_metrics) but keeps the response timestamp
    pub async fn query_metrics_raw(&mut self, request: MetricsRequest) -> Result<MetricsResponse> {
        self.send(&ClientMessage::MetricsRequest(request)).await?;

        match self.recv().await? {
            ServerMessage::MetricsResponse(response) => Ok(response),
            other => Err(unexpected(MessageType::ServerMetricsResponse, other)),
        }
    }

    // =========================================================================
    // Raw access
    // =========================================================================

    /// Send any message, typed or raw
    pub async fn send<M: ToEnvelope + ?Sized>(&mut self, message: &M) -> Result<()> {
        self.stream.send(message).await?;
        Ok(())
    }

    /// Send a raw `{type, payload}` frame
    pub async fn send_raw(&mut self, msg_type: &str, payload: Value) -> Result<()> {
        self.send(&Envelope::new(msg_type, payload)).await
    }

    /// Receive the next server message
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        let env = self
            .stream
            .read_envelope()
            .await?
            .ok_or(ClientError::ConnectionClosed)?;
        Ok(ServerMessage::try_from(&env)?)
    }

    /// Whether the server has closed the connection
    pub async fn is_closed(&mut self) -> bool {
        matches!(self.stream.read_envelope().await, Ok(None) | Err(_))
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

fn unexpected(expected: MessageType, got: ServerMessage) -> ClientError {
    match got {
        ServerMessage::Error(e) => ClientError::server_error(e.code, e.message),
        other => ClientError::UnexpectedReply {
            expected,
            got: other.message_type(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fota_core::DownloadStatus;
    use fota_proto::{ErrorPayload, UpdateResponse};
    use pretty_assertions::assert_eq;
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (FotaClient<DuplexStream>, FrameStream<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        (FotaClient::new(a), FrameStream::new(b))
    }

    async fn next_client_message(server: &mut FrameStream<DuplexStream>) -> ClientMessage {
        let env = server.read_envelope().await.unwrap().expect("frame");
        ClientMessage::try_from(&env).unwrap()
    }

    #[tokio::test]
    async fn test_handshake_collects_update_response() {
        let (mut client, mut server) = pair();
        let server_task = tokio::spawn(async move {
            let ClientMessage::Handshake(request) = next_client_message(&mut server).await else {
                panic!("expected HANDSHAKE");
            };
            assert_eq!(request.service_type.as_deref(), Some("checkingForUpdate"));
            assert_eq!(request.ecu_versions()["ECM"], "1.0.0");

            server
                .send(&ServerMessage::Handshake(HandshakeReply::authenticated()))
                .await
                .unwrap();
            let mut updates_needed = BTreeMap::new();
            updates_needed.insert("ECM".to_string(), "1.2.0".to_string());
            server
                .send(&ServerMessage::UpdateResponse(UpdateResponse { updates_needed }))
                .await
                .unwrap();
        });

        let mut versions = BTreeMap::new();
        versions.insert("ECM".to_string(), "1.0.0".to_string());
        let handshake = client
            .handshake("ModelX", "MX2023-001", ServiceType::CheckForUpdate, &versions)
            .await
            .unwrap();
        assert_eq!(handshake.reply.status, "authenticated");
        assert_eq!(handshake.updates_needed["ECM"], "1.2.0");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_reply_becomes_server_error() {
        let (mut client, mut server) = pair();
        tokio::spawn(async move {
            next_client_message(&mut server).await;
            server
                .send(&ServerMessage::Error(ErrorPayload::new(401, "Authentication failed")))
                .await
                .unwrap();
        });

        let err = client
            .handshake("ModelX", "nope", ServiceType::CheckForUpdate, &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(401));
    }

    #[tokio::test]
    async fn test_metrics_query_rejects_other_reply() {
        let (mut client, mut server) = pair();
        tokio::spawn(async move {
            next_client_message(&mut server).await;
            server
                .send(&ServerMessage::UpdateResponse(UpdateResponse {
                    updates_needed: BTreeMap::new(),
                }))
                .await
                .unwrap();
        });

        let err = client
            .query_metrics(MetricsRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedReply {
                expected: MessageType::ServerMetricsResponse,
                got: MessageType::UpdateResponse,
            }
        ));
    }

    #[tokio::test]
    async fn test_download_reassembles_and_rejects() {
        let (mut client, mut server) = pair();
        let server_task = tokio::spawn(async move {
            next_client_message(&mut server).await;
            let mut files = BTreeMap::new();
            files.insert("A".to_string(), 4);
            files.insert("B".to_string(), 2);
            let mut file_offsets = BTreeMap::new();
            file_offsets.insert("A".to_string(), 0);
            file_offsets.insert("B".to_string(), 0);
            server
                .send(&ServerMessage::DownloadStart(DownloadStart {
                    total_size: 6,
                    files,
                    file_offsets,
                }))
                .await
                .unwrap();
            assert!(matches!(
                next_client_message(&mut server).await,
                ClientMessage::DownloadAck(_)
            ));

            let mut acks = Vec::new();
            for (ecu, offset, data) in [
                ("A", 0, &[1u8, 2][..]),
                ("A", 2, &[3u8, 4][..]),
                ("B", 0, &[9u8, 9][..]),
            ] {
                server
                    .send(&ServerMessage::FileChunk(FileChunk::new(ecu, offset, data)))
                    .await
                    .unwrap();
                let ClientMessage::ChunkAck(ack) = next_client_message(&mut server).await else {
                    panic!("expected CHUNK_ACK");
                };
                acks.push(ack.matches(ecu, offset));
            }
            server
                .send(&ServerMessage::DownloadComplete(DownloadComplete {
                    status: DownloadStatus::FailedPartialSuccess,
                    successful_transfers: 1,
                    total_files: 2,
                }))
                .await
                .unwrap();
            acks
        });

        let result = client
            .download(DownloadRequestPayload::default(), |chunk| {
                if chunk.ecu_name == "B" {
                    ChunkAction::Reject
                } else {
                    ChunkAction::Ack
                }
            })
            .await
            .unwrap();

        assert_eq!(server_task.await.unwrap(), vec![true, true, false]);
        assert_eq!(result.files["A"], vec![1, 2, 3, 4]);
        assert!(!result.files.contains_key("B"));
        assert_eq!(result.rejected, vec!["B".to_string()]);
        assert_eq!(result.complete.successful_transfers, 1);
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (mut client, server) = pair();
        drop(server);
        assert!(matches!(
            client.recv().await,
            Err(ClientError::ConnectionClosed)
        ));
    }
}
