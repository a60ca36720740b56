//! Wire protocol for vehicle firmware updates
//!
//! - [`codec`] - 10-digit length prefix + JSON `{type, payload}` body
//! - [`message`] - closed message enums with typed payloads
//! - [`stream`] - async framed reader/writer over any byte transport

pub mod codec;
pub mod error;
pub mod message;
pub mod stream;

pub use codec::{decode, encode, encode_envelope, PREFIX_LEN};
pub use error::{MessageError, ProtocolError};
pub use message::{
    ChunkAck, ClientMessage, DownloadAck, DownloadComplete, DownloadRequestPayload, DownloadStart,
    Envelope, ErrorPayload, FeedbackData, FileChunk, FlashingFeedbackAck,
    FlashingFeedbackPayload, HandshakeReply, HandshakeRequest, MessageType, MetricsRequest,
    MetricsResponse, ServerMessage, ToEnvelope, UpdateCheck, UpdateCheckMetadata, UpdateResponse,
};
pub use stream::{FrameStream, DEFAULT_MAX_FRAME_BYTES};
