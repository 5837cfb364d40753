use thiserror::Error;

use crate::codec::CodecError;
use crate::hash::HashError;
use crate::tag::TagError;

/// Errors that can occur on the server connection.
///
/// Decode errors terminate the connection: once a frame fails to parse
/// the stream is no longer trusted. Transport errors terminate the
/// connection. Cancellation is not an error and never appears here.
#[derive(Debug, Error)]
pub enum ServerError {
    // ---- protocol decode ----
    /// The frame header carried an unknown protocol byte.
    #[error("invalid protocol type 0x{0:02x}")]
    InvalidProtocolType(u8),

    /// A recognized opcode's payload failed to decode.
    #[error("packet decode failed: {0}")]
    DecodePacket(String),

    /// Tag or tag list decode failure.
    #[error(transparent)]
    Tag(#[from] TagError),

    /// Primitive decode or inflate failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Hash parse failure.
    #[error(transparent)]
    Hash(#[from] HashError),

    // ---- transport ----
    /// The session is shutting down.
    #[error("session is closing")]
    SessionClosing,

    /// A deadline expired.
    #[error("operation timed out")]
    TimedOut,

    /// The server hostname did not resolve to an IPv4 endpoint.
    #[error("failed to resolve {0}")]
    ResolveFailed(String),

    /// The TCP connect failed.
    #[error("connect failed: {0}")]
    ConnectFailed(std::io::Error),

    /// I/O failure on the established connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ---- backpressure ----
    /// The outbound frame queue is at its soft cap; the frame was
    /// dropped. Non-fatal.
    #[error("write queue full")]
    QueueFull,
}

impl ServerError {
    /// Wraps nested decode failures as a packet decode error, keeping
    /// already-classified errors untouched.
    pub(crate) fn into_decode_error(self) -> ServerError {
        match self {
            ServerError::Tag(_) | ServerError::Codec(_) | ServerError::Hash(_) => {
                ServerError::DecodePacket(self.to_string())
            }
            other => other,
        }
    }
}
