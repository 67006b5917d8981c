//! Error types for client operations.

use std::{io, time::Duration};

use crate::{
    codec::{DecodeError, EncodeError},
    protocol::Opcode,
};

/// Errors emitted by [`crate::client::PortolanClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport or framing error.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// Failed to encode an outbound message.
    #[error("failed to encode request: {0}")]
    Encode(#[from] EncodeError),
    /// Failed to decode an inbound message.
    #[error("failed to decode response: {0}")]
    Decode(#[from] DecodeError),
    /// The peer closed the connection before a response arrived.
    #[error("connection closed by peer")]
    Disconnected,
    /// The response answered a different request.
    #[error("request id mismatch: expected {expected}, received {received}")]
    CorrelationMismatch { expected: u32, received: u32 },
    /// The response carried the wrong acknowledgement opcode.
    #[error("unexpected response: expected {expected}, received {received}")]
    UnexpectedResponse { expected: Opcode, received: Opcode },
    /// The message is not a request and expects no answer.
    #[error("{0} is not a request")]
    NotARequest(Opcode),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}
