//! Error types for the codec and message layers.
//!
//! # Error Categories
//!
//! - [`FramingError`]: the byte stream no longer lines up with frame boundaries (checksum mismatch,
//!   oversized declared payload).
//! - [`DecodeError`]: a validated frame does not hold a message this side can interpret.
//! - [`EncodeError`]: a frame or message cannot be written; nothing is transmitted.
//! - [`EofError`]: the peer closed the stream, cleanly or mid-frame.
//! - [`CodecError`]: top-level enum wrapping all categories plus I/O errors.
//!
//! Framing, decode and encode errors are local to one frame: the connection
//! stays usable. I/O and EOF errors end the connection.

use std::io;

use thiserror::Error;

use crate::protocol::Opcode;

/// Recommended reaction to a codec error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Discard the offending frame or bytes and keep serving.
    Drop,
    /// Close the connection.
    Disconnect,
}

/// Errors detected while splitting the byte stream into frames.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Header declares a payload larger than the configured maximum.
    #[error("frame payload exceeds max length: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },

    /// Computed checksum differs from the header's `crc32`.
    #[error("frame checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Fewer bytes than a header were supplied where a whole frame was expected.
    #[error("incomplete frame header: have {have}, need {need}")]
    IncompleteHeader { have: usize, need: usize },
}

/// Errors raised while interpreting a validated frame as a message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Opcode has no message layout on this side.
    #[error("unsupported opcode: {0}")]
    UnsupportedOpcode(u16),

    /// Payload is shorter than the opcode's fixed layout.
    #[error("{opcode} payload truncated: have {have} bytes, need {need}")]
    Truncated {
        opcode: Opcode,
        have: usize,
        need: usize,
    },

    /// Acknowledgement carries a status code outside the defined set.
    #[error("unknown status code: {0}")]
    UnknownStatus(u32),

    /// VL3 request names an unknown address type.
    #[error("unknown l3 type: {0}")]
    UnknownL3Type(u32),

    /// Log entry carries an unknown type tag.
    #[error("unknown log entry type {kind} at offset {offset}")]
    UnknownLogType { kind: u32, offset: usize },

    /// A sequence element would run past the end of the payload.
    #[error("element at offset {offset} needs {need} bytes, {remaining} remain")]
    ElementOverrun {
        offset: usize,
        need: usize,
        remaining: usize,
    },

    /// Declared element count disagrees with the bytes present.
    #[error("declared {declared} elements but payload holds {actual}")]
    CountMismatch { declared: usize, actual: usize },
}

/// Errors raised while writing a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// Frame header carries an opcode with no defined meaning.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u16),

    /// Payload does not fit the configured maximum.
    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// EOF conditions distinguishing a clean close from a truncated frame.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// Peer closed the stream at a frame boundary.
    #[error("connection closed cleanly at frame boundary")]
    CleanClose,

    /// Peer closed the stream after the header but before the payload completed.
    #[error("premature EOF: {bytes_received} of {expected} payload bytes received")]
    MidFrame {
        bytes_received: usize,
        expected: usize,
    },

    /// Peer closed the stream while the header was being read.
    #[error("premature EOF during header: {bytes_received} of {header_size} header bytes")]
    MidHeader {
        bytes_received: usize,
        header_size: usize,
    },
}

/// Top-level codec error taxonomy.
///
/// ```
/// use portolan::codec::{CodecError, FramingError, RecoveryPolicy};
///
/// let err = CodecError::Framing(FramingError::ChecksumMismatch {
///     expected: 1,
///     actual: 2,
/// });
/// assert_eq!(err.default_recovery_policy(), RecoveryPolicy::Drop);
/// assert_eq!(err.error_type(), "framing");
/// ```
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}

impl CodecError {
    /// Recommended recovery policy for this error.
    ///
    /// | Error Type | Policy |
    /// |------------|--------|
    /// | `Framing`  | `Drop` |
    /// | `Decode`   | `Drop` |
    /// | `Encode`   | `Drop` |
    /// | `Io`       | `Disconnect` |
    /// | `Eof`      | `Disconnect` |
    #[must_use]
    pub fn default_recovery_policy(&self) -> RecoveryPolicy {
        match self {
            Self::Framing(_) | Self::Decode(_) | Self::Encode(_) => RecoveryPolicy::Drop,
            Self::Io(_) | Self::Eof(_) => RecoveryPolicy::Disconnect,
        }
    }

    /// Returns true if this error represents a clean connection close.
    #[must_use]
    pub fn is_clean_close(&self) -> bool { matches!(self, Self::Eof(EofError::CleanClose)) }

    /// Returns true if the connection should be terminated.
    #[must_use]
    pub fn should_disconnect(&self) -> bool {
        self.default_recovery_policy() == RecoveryPolicy::Disconnect
    }

    /// Error category for logging and metrics.
    ///
    /// One of `"framing"`, `"decode"`, `"encode"`, `"io"` or `"eof"`.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::Io(_) => "io",
            Self::Eof(_) => "eof",
        }
    }

    /// Recover a codec error previously converted into an [`io::Error`].
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<CodecError>()) {
            return Self::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<CodecError>()) {
            Some(Ok(codec)) => *codec,
            _ => Self::Io(io::Error::other("codec error lost during conversion")),
        }
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e,
            other @ (CodecError::Framing(_) | CodecError::Decode(_) | CodecError::Encode(_)) => {
                io::Error::new(io::ErrorKind::InvalidData, other)
            }
            other @ CodecError::Eof(_) => io::Error::new(io::ErrorKind::UnexpectedEof, other),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
