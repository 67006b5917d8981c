//! Wire-byte builders.
//!
//! [`raw_frame`] writes the header by hand rather than through the codec, so
//! it can carry unknown opcodes or arbitrary versions.

use bytes::BytesMut;
use portolan::{
    Envelope,
    checksum::frame_checksum,
    message::encode,
    protocol::{CRC_OFFSET, HEADER_LEN},
};
use tokio_util::codec::Encoder;

/// Encode `envelope` into a complete, checksummed frame.
///
/// # Panics
///
/// Panics if the envelope cannot be encoded.
#[must_use]
pub fn request_wire(envelope: &Envelope) -> Vec<u8> {
    let frame = encode(envelope).expect("encodable envelope");
    let mut buf = BytesMut::new();
    portolan::SvpCodec::default()
        .encode(frame, &mut buf)
        .expect("frame fits the default payload cap");
    buf.to_vec()
}

/// Concatenate the frames of several envelopes, as a pipelining client would.
#[must_use]
pub fn pipeline(envelopes: &[Envelope]) -> Vec<u8> {
    envelopes.iter().flat_map(request_wire).collect()
}

/// Build a frame from raw header fields with a correct checksum.
///
/// ```rust
/// use portolan::checksum::frame_checksum;
/// use portolan_testing::raw_frame;
///
/// let wire = raw_frame(1, 99, 7, &[]);
/// assert_eq!(wire.len(), 16);
/// assert_eq!(
///     u32::from_be_bytes(wire[12..16].try_into().unwrap()),
///     frame_checksum(&wire)
/// );
/// ```
///
/// # Panics
///
/// Panics if `payload` is longer than `u32::MAX` bytes.
#[must_use]
pub fn raw_frame(version: u16, opcode: u16, request_id: u32, payload: &[u8]) -> Vec<u8> {
    let size = u32::try_from(payload.len()).expect("payload length fits in u32");
    let mut wire = Vec::with_capacity(HEADER_LEN + payload.len());
    wire.extend_from_slice(&version.to_be_bytes());
    wire.extend_from_slice(&opcode.to_be_bytes());
    wire.extend_from_slice(&size.to_be_bytes());
    wire.extend_from_slice(&request_id.to_be_bytes());
    wire.extend_from_slice(&[0; 4]);
    wire.extend_from_slice(payload);
    let crc = frame_checksum(&wire);
    wire[CRC_OFFSET..HEADER_LEN].copy_from_slice(&crc.to_be_bytes());
    wire
}

/// Flip one bit of the stored checksum so the frame fails verification.
#[must_use]
pub fn corrupt_checksum(mut wire: Vec<u8>) -> Vec<u8> {
    wire[CRC_OFFSET] ^= 0x01;
    wire
}
