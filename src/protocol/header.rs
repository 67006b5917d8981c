//! The fixed 16-byte frame header.

use bytes::{Buf, BufMut};

use super::{CRC_OFFSET, HEADER_LEN};

/// Decoded header fields of a frame.
///
/// `opcode` is kept as the raw wire value so frames with opcodes this side
/// does not understand still pass through framing and reach the decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub opcode: u16,
    pub payload_size: u32,
    pub request_id: u32,
    pub crc32: u32,
}

impl FrameHeader {
    /// Parse the header from the first [`HEADER_LEN`] bytes of `src`.
    ///
    /// Returns `None` when fewer than [`HEADER_LEN`] bytes are available.
    #[must_use]
    pub fn parse(src: &[u8]) -> Option<Self> {
        let mut buf = src.get(..HEADER_LEN)?;
        Some(Self {
            version: buf.get_u16(),
            opcode: buf.get_u16(),
            payload_size: buf.get_u32(),
            request_id: buf.get_u32(),
            crc32: buf.get_u32(),
        })
    }

    /// Append the header to `dst` with the checksum field zeroed.
    pub fn put_unsealed(&self, dst: &mut impl BufMut) {
        dst.put_u16(self.version);
        dst.put_u16(self.opcode);
        dst.put_u32(self.payload_size);
        dst.put_u32(self.request_id);
        dst.put_u32(0);
    }

    /// Total frame length (header plus payload) this header declares.
    #[must_use]
    pub fn frame_len(&self) -> usize { HEADER_LEN + self.payload_size as usize }
}

/// Overwrite the checksum field of an encoded frame.
///
/// # Panics
///
/// Panics if `frame` is shorter than the header.
pub(crate) fn stamp_crc(frame: &mut [u8], crc: u32) {
    let mut field = &mut frame[CRC_OFFSET..HEADER_LEN];
    field.put_u32(crc);
}
