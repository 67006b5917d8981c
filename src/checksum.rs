//! Frame checksum computation.
//!
//! The checksum is a standard CRC-32 over the complete frame with the four
//! bytes of the `crc32` header field treated as zero. The field is skipped
//! logically rather than zeroed in place, so the input is never mutated and
//! the same bytes can be checksummed while they are being validated.

use crc32fast::Hasher;

use crate::protocol::{CRC_LEN, CRC_OFFSET};

const ZERO_CRC: [u8; CRC_LEN] = [0; CRC_LEN];

/// Compute the checksum of an encoded frame.
///
/// `frame` should hold the header followed by the payload. Inputs shorter
/// than the header are hashed as if the missing checksum bytes were absent.
///
/// ```
/// use portolan::checksum::frame_checksum;
///
/// let mut frame = [0u8; 16];
/// frame[1] = 2;
/// frame[3] = 1;
/// let crc = frame_checksum(&frame);
/// frame[12..].copy_from_slice(&crc.to_be_bytes());
/// assert_eq!(frame_checksum(&frame), crc);
/// ```
#[must_use]
pub fn frame_checksum(frame: &[u8]) -> u32 {
    let (head, rest) = frame.split_at(CRC_OFFSET.min(frame.len()));
    let skipped = rest.len().min(CRC_LEN);
    let mut hasher = Hasher::new();
    hasher.update(head);
    hasher.update(&ZERO_CRC[..skipped]);
    hasher.update(&rest[skipped..]);
    hasher.finalize()
}
