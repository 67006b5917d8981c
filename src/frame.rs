//! Validated protocol frames.
//!
//! A [`Frame`] is the unit the codec emits after checksum validation and the
//! unit it consumes when writing. The payload is not interpreted here; see
//! [`crate::message`] for typed bodies.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    checksum::frame_checksum,
    protocol::{FrameHeader, HEADER_LEN, Opcode, header::stamp_crc},
};

/// Header fields plus the raw payload bytes of one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Build an outgoing frame.
    ///
    /// `payload_size` and `crc32` are left zero; they are derived from the
    /// payload when the frame is written.
    #[must_use]
    pub fn new(version: u16, opcode: Opcode, request_id: u32, payload: Bytes) -> Self {
        Self {
            header: FrameHeader {
                version,
                opcode: opcode.as_u16(),
                payload_size: 0,
                request_id,
                crc32: 0,
            },
            payload,
        }
    }

    /// The header's opcode, if it names a known operation.
    ///
    /// # Errors
    ///
    /// Returns the raw value when the opcode is not recognised.
    pub fn opcode(&self) -> Result<Opcode, u16> { Opcode::try_from(self.header.opcode) }

    #[must_use]
    pub fn version(&self) -> u16 { self.header.version }

    #[must_use]
    pub fn request_id(&self) -> u32 { self.header.request_id }

    /// Total encoded length of this frame.
    #[must_use]
    pub fn encoded_len(&self) -> usize { HEADER_LEN + self.payload.len() }

    /// Append the sealed frame to `dst`.
    ///
    /// The header's `payload_size` is taken from the payload and the checksum
    /// is computed over the written bytes and stamped last. The caller must
    /// ensure the payload length fits in a `u32`.
    pub(crate) fn write_sealed(&self, payload_size: u32, dst: &mut BytesMut) {
        let start = dst.len();
        dst.reserve(self.encoded_len());
        FrameHeader {
            payload_size,
            ..self.header
        }
        .put_unsealed(dst);
        dst.put_slice(&self.payload);
        let crc = frame_checksum(&dst[start..]);
        stamp_crc(&mut dst[start..], crc);
    }
}
