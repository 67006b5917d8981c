//! Framing codec for the lookup protocol.
//!
//! [`SvpCodec`] splits an arbitrarily chunked byte stream into
//! checksum-validated [`Frame`]s and writes frames back with their
//! `payload_size` and `crc32` fields filled in. It plugs into
//! [`tokio_util::codec::Framed`], so a connection is simply a
//! `Framed<TcpStream, SvpCodec>`.
//!
//! # Desynchronisation
//!
//! A checksum mismatch, or a header declaring a payload above the configured
//! maximum, means the stream no longer lines up with frame boundaries. The
//! whole accumulation buffer is discarded, including any later frame that
//! arrived in the same read, and decoding resumes with the next bytes read.
//! These conditions are logged and counted but are not surfaced as decoder
//! errors: `FramedRead` stops yielding after the first error, and a forged
//! frame must not be able to end the connection.
//!
//! # Error Handling
//!
//! See the [`error`] module for the taxonomy shared with the message layer.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    checksum::frame_checksum,
    frame::Frame,
    metrics,
    protocol::{DEFAULT_MAX_PAYLOAD_SIZE, FrameHeader, HEADER_LEN, Opcode},
};

pub mod error;

pub use error::{CodecError, DecodeError, EncodeError, EofError, FramingError, RecoveryPolicy};

/// Frame codec with a configurable payload cap.
#[derive(Clone, Copy, Debug)]
pub struct SvpCodec {
    max_payload_size: usize,
}

impl SvpCodec {
    /// Construct a codec accepting payloads of at most `max_payload_size` bytes.
    ///
    /// The cap is clamped to what the 32-bit `payload_size` field can express.
    #[must_use]
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size: max_payload_size.min(u32::MAX as usize),
        }
    }

    /// Return the maximum payload length accepted by this codec.
    #[must_use]
    pub fn max_payload_size(&self) -> usize { self.max_payload_size }

    /// Extract the next complete, valid frame from `src`.
    ///
    /// Returns `None` when more bytes are needed, or when the buffer was
    /// discarded after a framing error.
    fn extract(&self, src: &mut BytesMut) -> Option<Frame> {
        let header = FrameHeader::parse(src)?;
        let declared = header.payload_size as usize;
        if declared > self.max_payload_size {
            discard(
                src,
                &FramingError::OversizedFrame {
                    size: declared,
                    max: self.max_payload_size,
                },
            );
            return None;
        }

        let total = header.frame_len();
        if src.len() < total {
            src.reserve(total - src.len());
            return None;
        }

        let actual = frame_checksum(&src[..total]);
        if actual != header.crc32 {
            discard(
                src,
                &FramingError::ChecksumMismatch {
                    expected: header.crc32,
                    actual,
                },
            );
            return None;
        }

        let mut bytes = src.split_to(total);
        bytes.advance(HEADER_LEN);
        Some(Frame {
            header,
            payload: bytes.freeze(),
        })
    }
}

impl Default for SvpCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_PAYLOAD_SIZE) }
}

fn discard(src: &mut BytesMut, err: &FramingError) {
    tracing::warn!(
        error = %err,
        discarded = src.len(),
        "stream desynchronised, discarding buffered bytes"
    );
    metrics::inc_errors(error_kind(err));
    src.clear();
}

fn error_kind(err: &FramingError) -> &'static str {
    match err {
        FramingError::ChecksumMismatch { .. } => "checksum",
        FramingError::OversizedFrame { .. } => "oversized",
        FramingError::IncompleteHeader { .. } => "framing",
    }
}

impl Decoder for SvpCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.extract(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.extract(src) {
            return Ok(Some(frame));
        }
        // Clean close: nothing buffered at a frame boundary, or the tail was
        // discarded as garbage.
        if src.is_empty() {
            return Ok(None);
        }
        let err = build_eof_error(src);
        src.clear();
        Err(CodecError::Eof(err).into())
    }
}

/// Describe how far the peer got before closing mid-frame.
///
/// - [`EofError::MidHeader`]: fewer than [`HEADER_LEN`] bytes were received.
/// - [`EofError::MidFrame`]: the header is complete but the payload is truncated.
pub(crate) fn build_eof_error(src: &[u8]) -> EofError {
    match FrameHeader::parse(src) {
        Some(header) => EofError::MidFrame {
            bytes_received: src.len().saturating_sub(HEADER_LEN),
            expected: header.payload_size as usize,
        },
        None => EofError::MidHeader {
            bytes_received: src.len(),
            header_size: HEADER_LEN,
        },
    }
}

impl Encoder<Frame> for SvpCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Every check happens before the first byte is written so a rejected
        // frame leaves `dst` untouched.
        if Opcode::try_from(item.header.opcode).is_err() {
            return Err(CodecError::Encode(EncodeError::UnknownOpcode(item.header.opcode)).into());
        }
        let size = item.payload.len();
        let payload_size = match u32::try_from(size) {
            Ok(n) if size <= self.max_payload_size => n,
            _ => {
                return Err(CodecError::Encode(EncodeError::PayloadTooLarge {
                    size,
                    max: self.max_payload_size,
                })
                .into());
            }
        };
        item.write_sealed(payload_size, dst);
        Ok(())
    }
}

/// Push-style frame assembler.
///
/// Runs the same algorithm as the [`Decoder`] over a buffer it owns, for
/// callers that receive bytes in chunks outside a `Framed` transport.
///
/// ```
/// use bytes::{Bytes, BytesMut};
/// use portolan::{
///     codec::{FrameAssembler, SvpCodec},
///     frame::Frame,
///     protocol::{CURRENT_VERSION, Opcode},
/// };
/// use tokio_util::codec::Encoder;
///
/// let mut wire = BytesMut::new();
/// let mut codec = SvpCodec::default();
/// codec
///     .encode(Frame::new(CURRENT_VERSION, Opcode::Ping, 7, Bytes::new()), &mut wire)
///     .expect("encode ping");
///
/// let mut assembler = FrameAssembler::new(codec);
/// assert!(assembler.push(&wire[..10]).is_empty());
/// let frames = assembler.push(&wire[10..]);
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].request_id(), 7);
/// ```
#[derive(Debug, Default)]
pub struct FrameAssembler {
    codec: SvpCodec,
    buffer: BytesMut,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(codec: SvpCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
        }
    }

    /// Append `chunk` and return every frame it completes, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        std::iter::from_fn(|| self.codec.extract(&mut self.buffer)).collect()
    }

    /// Number of bytes held back waiting for the rest of a frame.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buffer.len() }

    /// Signal end of stream.
    ///
    /// # Errors
    ///
    /// Returns an [`EofError`] if a partial frame is still buffered.
    pub fn finish(self) -> Result<(), EofError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(build_eof_error(&self.buffer))
        }
    }
}
