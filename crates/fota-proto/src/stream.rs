//! Async framed stream over any byte transport

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{self, PREFIX_LEN};
use crate::error::ProtocolError;
use crate::message::{Envelope, ToEnvelope};

/// Default upper bound for a single frame body
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads and writes length-prefixed frames.
///
/// Works over `TcpStream` in production and `tokio::io::duplex` in tests.
/// Reads are strictly sequential; the only suspension points are the
/// prefix read and the body read.
pub struct FrameStream<S> {
    inner: S,
    max_frame_bytes: usize,
    read_timeout: Option<Duration>,
}

impl<S> FrameStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            read_timeout: None,
        }
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Bound every `read_envelope` call (idle timeout)
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Read the next frame using the configured read timeout.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly
    /// between frames.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        match self.read_timeout {
            Some(timeout) => self.read_envelope_within(timeout).await,
            None => self.read_frame().await,
        }
    }

    /// Read the next frame, failing with `Timeout` after `timeout`
    pub async fn read_envelope_within(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Envelope>, ProtocolError> {
        tokio::time::timeout(timeout, self.read_frame())
            .await
            .map_err(|_| ProtocolError::Timeout(format!("no frame within {:?}", timeout)))?
    }

    async fn read_frame(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        let mut prefix = [0u8; PREFIX_LEN];
        let got = read_full(&mut self.inner, &mut prefix).await?;
        if got == 0 {
            return Ok(None);
        }
        if got < PREFIX_LEN {
            return Err(ProtocolError::ConnectionClosed);
        }

        let declared = codec::parse_prefix(&prefix)?;
        if declared > self.max_frame_bytes as u64 {
            return Err(ProtocolError::FrameTooLarge {
                len: declared,
                max: self.max_frame_bytes,
            });
        }

        let declared = declared as usize;
        let mut body = vec![0u8; declared];
        let got = read_full(&mut self.inner, &mut body).await?;
        if got != declared {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: got,
            });
        }

        let envelope = codec::decode_body(&body)?;
        trace!(msg_type = %envelope.msg_type, len = declared, "frame received");
        Ok(Some(envelope))
    }

    /// Encode and write one message, flushing the transport
    pub async fn send<M: ToEnvelope + ?Sized>(&mut self, message: &M) -> Result<(), ProtocolError> {
        let frame = codec::encode(message)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        trace!(len = frame.len() - PREFIX_LEN, "frame sent");
        Ok(())
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Fill `buf` unless EOF comes first; returns bytes read
async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientMessage, HandshakeRequest};
    use serde_json::json;

    #[tokio::test]
    async fn test_send_and_read() {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = FrameStream::new(a);
        let mut rx = FrameStream::new(b);

        let msg = ClientMessage::Handshake(HandshakeRequest {
            car_type: Some("ModelX".into()),
            car_id: Some("MX2023-001".into()),
            service_type: Some("checkingForUpdate".into()),
            ..Default::default()
        });
        tx.send(&msg).await.unwrap();

        let env = rx.read_envelope().await.unwrap().unwrap();
        assert_eq!(ClientMessage::try_from(&env).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut rx = FrameStream::new(b);
        assert!(rx.read_envelope().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_body_is_length_mismatch() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"0000000050{\"type\"").await.unwrap();
        drop(a);
        let mut rx = FrameStream::new(b);
        assert!(matches!(
            rx.read_envelope().await,
            Err(ProtocolError::LengthMismatch { declared: 50, actual: 7 })
        ));
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_closed() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"00000").await.unwrap();
        drop(a);
        let mut rx = FrameStream::new(b);
        assert!(matches!(
            rx.read_envelope().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"0000001000").await.unwrap();
        let mut rx = FrameStream::new(b).with_max_frame_bytes(100);
        assert!(matches!(
            rx.read_envelope().await,
            Err(ProtocolError::FrameTooLarge { len: 1000, max: 100 })
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (_a, b) = tokio::io::duplex(64);
        let mut rx = FrameStream::new(b).with_read_timeout(Duration::from_millis(20));
        assert!(matches!(
            rx.read_envelope().await,
            Err(ProtocolError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_raw_envelope_passthrough() {
        let (a, b) = tokio::io::duplex(256);
        let mut tx = FrameStream::new(a);
        let mut rx = FrameStream::new(b);
        tx.send(&Envelope::new("REBOOT", json!({"now": true})))
            .await
            .unwrap();
        let env = rx.read_envelope().await.unwrap().unwrap();
        assert_eq!(env.msg_type, "REBOOT");
        assert!(env.message_type().is_err());
    }
}
