//! Unit tests for codec error types and recovery policies.

use std::io;

use rstest::rstest;

use super::{CodecError, DecodeError, EncodeError, EofError, FramingError, RecoveryPolicy};

#[rstest]
#[case(CodecError::Framing(FramingError::ChecksumMismatch { expected: 1, actual: 2 }), "framing")]
#[case(CodecError::Framing(FramingError::OversizedFrame { size: 2000, max: 1024 }), "framing")]
#[case(CodecError::Decode(DecodeError::UnsupportedOpcode(7)), "decode")]
#[case(CodecError::Encode(EncodeError::UnknownOpcode(99)), "encode")]
fn frame_local_errors_recommend_drop(#[case] err: CodecError, #[case] kind: &str) {
    assert_eq!(err.default_recovery_policy(), RecoveryPolicy::Drop);
    assert!(!err.should_disconnect());
    assert_eq!(err.error_type(), kind);
}

#[test]
fn io_error_recommends_disconnect() {
    let err = CodecError::Io(io::Error::other("test"));
    assert_eq!(err.default_recovery_policy(), RecoveryPolicy::Disconnect);
    assert!(err.should_disconnect());
}

#[test]
fn clean_eof_is_detectable() {
    let err = CodecError::Eof(EofError::CleanClose);
    assert!(err.is_clean_close());
    assert!(err.should_disconnect());
}

#[test]
fn mid_frame_eof_recommends_disconnect() {
    let err = CodecError::Eof(EofError::MidFrame {
        bytes_received: 3,
        expected: 12,
    });
    assert!(!err.is_clean_close());
    assert!(err.should_disconnect());
}

#[rstest]
#[case(CodecError::Framing(FramingError::IncompleteHeader { have: 2, need: 16 }), io::ErrorKind::InvalidData)]
#[case(CodecError::Decode(DecodeError::UnknownL3Type(9)), io::ErrorKind::InvalidData)]
#[case(CodecError::Eof(EofError::MidHeader { bytes_received: 4, header_size: 16 }), io::ErrorKind::UnexpectedEof)]
fn io_conversion_preserves_kind(#[case] err: CodecError, #[case] kind: io::ErrorKind) {
    let io_err: io::Error = err.into();
    assert_eq!(io_err.kind(), kind);
}

#[test]
fn codec_error_survives_io_round_trip() {
    let io_err: io::Error = CodecError::Eof(EofError::MidFrame {
        bytes_received: 1,
        expected: 4,
    })
    .into();
    let recovered = CodecError::from_io(io_err);
    assert!(matches!(
        recovered,
        CodecError::Eof(EofError::MidFrame {
            bytes_received: 1,
            expected: 4
        })
    ));
}

#[test]
fn plain_io_error_stays_io() {
    let recovered = CodecError::from_io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
    assert!(matches!(recovered, CodecError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
}

#[test]
fn checksum_mismatch_display_includes_values() {
    let err = FramingError::ChecksumMismatch {
        expected: 0xdead_beef,
        actual: 0x0000_0001,
    };
    assert_eq!(
        err.to_string(),
        "frame checksum mismatch: expected 0xdeadbeef, got 0x00000001"
    );
}
