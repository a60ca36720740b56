//! Resumable, ack-gated multi-file transfer
//!
//! # Sequence
//!
//! ```text
//! server                              vehicle
//!   | DOWNLOAD_START {sizes, offsets}    |
//!   |----------------------------------->|
//!   |                       DOWNLOAD_ACK |
//!   |<-----------------------------------|
//!   | FILE_CHUNK {ecu, offset, data}     |   per file, per chunk
//!   |----------------------------------->|
//!   |                          CHUNK_ACK |
//!   |<-----------------------------------|
//!   | DOWNLOAD_COMPLETE {status, counts} |
//!   |----------------------------------->|
//! ```
//!
//! Each chunk send blocks on its ack. A failed chunk read or a missing or
//! mismatched ack abandons the current file only; a lost transport
//! abandons the current file and every file after it.

use std::sync::Arc;
use std::time::Duration;

use fota_core::{BlobGateway, CarType, DownloadRequest, DownloadStatus};
use fota_proto::{
    ClientMessage, DownloadComplete, DownloadStart, FileChunk, FrameStream, MessageType,
    ProtocolError, ServerMessage,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;

/// A requested file that resolved to a readable image
#[derive(Debug, Clone)]
struct PlannedFile {
    ecu_name: String,
    location: String,
    size: u64,
    offset: u64,
}

enum FileResult {
    Complete,
    Failed(String),
    TransportLost(ProtocolError),
}

/// Result of one engine run
#[derive(Debug)]
pub struct TransferOutcome {
    /// Final state of the request, status terminal
    pub request: DownloadRequest,
    pub successful: usize,
    pub total: usize,
    /// Set when DOWNLOAD_COMPLETE could not be sent
    pub error: Option<ConnectionError>,
}

impl TransferOutcome {
    pub fn status(&self) -> DownloadStatus {
        self.request.status()
    }
}

pub struct TransferEngine {
    blobs: Arc<dyn BlobGateway>,
    chunk_size: usize,
    ack_timeout: Duration,
}

impl TransferEngine {
    pub fn new(blobs: Arc<dyn BlobGateway>, chunk_size: usize, ack_timeout: Duration) -> Self {
        Self {
            blobs,
            chunk_size: chunk_size.max(1),
            ack_timeout,
        }
    }

    /// Drive `request` to a terminal status.
    ///
    /// `on_progress` is called with the request after every state change
    /// and every acknowledged chunk.
    pub async fn run<S, F>(
        &self,
        stream: &mut FrameStream<S>,
        car_type: &CarType,
        mut request: DownloadRequest,
        mut on_progress: F,
    ) -> TransferOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        F: FnMut(&DownloadRequest) + Send,
    {
        let total = request.required_versions.len();
        let files = self.plan(car_type, &request).await;

        request.total_size = files.iter().map(|f| f.size).sum();
        advance(&mut request, DownloadStatus::SendingInProgress);
        on_progress(&request);

        info!(
            car_id = %request.car_id,
            requested = total,
            resolved = files.len(),
            total_size = request.total_size,
            "Starting download"
        );

        let start = DownloadStart {
            total_size: request.total_size,
            files: files.iter().map(|f| (f.ecu_name.clone(), f.size)).collect(),
            file_offsets: files
                .iter()
                .map(|f| (f.ecu_name.clone(), f.offset))
                .collect(),
        };
        if let Err(e) = stream.send(&ServerMessage::DownloadStart(start)).await {
            return self.abort(request, total, &mut on_progress, e.into());
        }

        match stream.read_envelope_within(self.ack_timeout).await {
            Ok(Some(env)) if env.msg_type == MessageType::DownloadAck.as_str() => {}
            Ok(Some(env)) => {
                warn!(got = %env.msg_type, "Download start not acknowledged");
                return self.abort(
                    request,
                    total,
                    &mut on_progress,
                    ConnectionError::Transfer(
                        "Client did not acknowledge download start".to_string(),
                    ),
                );
            }
            Ok(None) => {
                return self.abort(
                    request,
                    total,
                    &mut on_progress,
                    ProtocolError::ConnectionClosed.into(),
                )
            }
            Err(e) => return self.abort(request, total, &mut on_progress, e.into()),
        }

        let mut successful = 0;
        let mut lost = None;
        for file in &files {
            request.set_active(&file.ecu_name, true);
            on_progress(&request);

            let result = self
                .send_file(stream, file, &mut request, &mut on_progress)
                .await;
            request.set_active(&file.ecu_name, false);

            match result {
                FileResult::Complete => {
                    successful += 1;
                    info!(ecu = %file.ecu_name, size = file.size, "File transferred");
                }
                FileResult::Failed(reason) => {
                    warn!(ecu = %file.ecu_name, reason = %reason, "File transfer failed");
                }
                FileResult::TransportLost(e) => {
                    warn!(ecu = %file.ecu_name, error = %e, "Transport lost during transfer");
                    lost = Some(e);
                    break;
                }
            }
        }

        let status = DownloadStatus::from_counts(successful, total);
        advance(&mut request, status);
        on_progress(&request);

        info!(
            car_id = %request.car_id,
            %status,
            successful,
            total,
            transferred = request.transferred_size,
            "Download finished"
        );

        let error = match lost {
            Some(e) => Some(e.into()),
            None => {
                let complete = ServerMessage::DownloadComplete(DownloadComplete {
                    status,
                    successful_transfers: successful,
                    total_files: total,
                });
                stream.send(&complete).await.err().map(ConnectionError::from)
            }
        };

        TransferOutcome {
            request,
            successful,
            total,
            error,
        }
    }

    /// Resolve every requested (ECU, version) to a location, size and offset.
    /// Unresolvable entries are dropped here and counted as failed later.
    async fn plan(&self, car_type: &CarType, request: &DownloadRequest) -> Vec<PlannedFile> {
        let mut files = Vec::with_capacity(request.required_versions.len());
        for (ecu_name, version) in &request.required_versions {
            let Some(resolved) = car_type.resolve_version(ecu_name, version) else {
                warn!(ecu = %ecu_name, version = %version, "Requested version not in catalog");
                continue;
            };
            let size = match self.blobs.size(&resolved.location).await {
                Ok(size) => size,
                Err(e) => {
                    warn!(ecu = %ecu_name, location = %resolved.location, error = %e, "Firmware size unavailable");
                    continue;
                }
            };
            let offset = request.offset_for(ecu_name);
            if offset > size {
                warn!(ecu = %ecu_name, offset, size, "Resume offset beyond end of image");
                continue;
            }
            files.push(PlannedFile {
                ecu_name: ecu_name.clone(),
                location: resolved.location.clone(),
                size,
                offset,
            });
        }
        files
    }

    async fn send_file<S, F>(
        &self,
        stream: &mut FrameStream<S>,
        file: &PlannedFile,
        request: &mut DownloadRequest,
        on_progress: &mut F,
    ) -> FileResult
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        F: FnMut(&DownloadRequest) + Send,
    {
        let mut offset = file.offset;
        while offset < file.size {
            let want = (self.chunk_size as u64).min(file.size - offset) as usize;
            let chunk = match self.blobs.read_range(&file.location, offset, want).await {
                Ok(Some(chunk)) if !chunk.is_empty() => chunk,
                Ok(_) => return FileResult::Failed(format!("no data at offset {}", offset)),
                Err(e) => return FileResult::Failed(e.to_string()),
            };

            let msg = ServerMessage::FileChunk(FileChunk::new(&file.ecu_name, offset, &chunk));
            if let Err(e) = stream.send(&msg).await {
                return FileResult::TransportLost(e);
            }

            match stream.read_envelope_within(self.ack_timeout).await {
                Ok(Some(env)) => match ClientMessage::try_from(&env) {
                    Ok(ClientMessage::ChunkAck(ack)) if ack.matches(&file.ecu_name, offset) => {}
                    _ => {
                        return FileResult::Failed(format!(
                            "chunk at offset {} not acknowledged (got {})",
                            offset, env.msg_type
                        ))
                    }
                },
                Ok(None) => return FileResult::TransportLost(ProtocolError::ConnectionClosed),
                Err(e) => return FileResult::TransportLost(e),
            }

            offset += chunk.len() as u64;
            request.record_chunk(chunk.len() as u64);
            on_progress(&*request);
            debug!(ecu = %file.ecu_name, offset, "Chunk acknowledged");
        }
        FileResult::Complete
    }

    fn abort<F>(
        &self,
        mut request: DownloadRequest,
        total: usize,
        on_progress: &mut F,
        error: ConnectionError,
    ) -> TransferOutcome
    where
        F: FnMut(&DownloadRequest),
    {
        advance(&mut request, DownloadStatus::AllFailed);
        on_progress(&request);
        warn!(car_id = %request.car_id, error = %error, "Download aborted");
        TransferOutcome {
            request,
            successful: 0,
            total,
            error: Some(error),
        }
    }
}

/// Offset for an ECU, matching the name exactly first, then case-insensitively
fn advance(request: &mut DownloadRequest, next: DownloadStatus) {
    if let Err(e) = request.advance(next) {
        warn!(error = %e, "Ignoring download status change");
    }
}
