//! Unit tests for message encoding and decoding.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};
use proptest::prelude::prop_assert_eq;
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use super::*;
use crate::{
    codec::{DecodeError, SvpCodec},
    frame::Frame,
    message::log::{ROUTE_LOG_LEN, VL2_LOG_LEN, VL3_LOG_LEN},
    protocol::{CURRENT_VERSION, HEADER_LEN, VERSION_ONE},
    test_helpers::{deterministic_runner, envelope},
};

const MAC: MacAddress = MacAddress([0x00, 0x0a, 0x95, 0x9d, 0x68, 0x16]);

fn mapped(a: u8, b: u8, c: u8, d: u8) -> Ipv6Addr { Ipv4Addr::new(a, b, c, d).to_ipv6_mapped() }

fn raw_frame(opcode: Opcode, payload: &[u8]) -> Frame {
    Frame::new(CURRENT_VERSION, opcode, 1, Bytes::copy_from_slice(payload))
}

fn payload_of(message: Message) -> Bytes {
    encode(&Envelope::request(1, message))
        .expect("encode")
        .payload
}

#[test]
fn envelopes_survive_the_wire() {
    let mut runner = deterministic_runner(256);
    runner
        .run(&envelope(), |sent| {
            let mut codec = SvpCodec::default();
            let mut wire = BytesMut::new();
            codec
                .encode(encode(&sent).expect("encode"), &mut wire)
                .expect("write frame");
            let frame = codec
                .decode(&mut wire)
                .expect("read frame")
                .expect("complete frame");
            prop_assert_eq!(decode(&frame), Ok(sent));
            Ok(())
        })
        .expect("round-trip property should hold");
}

#[rstest]
#[case(Message::Ping, 0)]
#[case(Message::Vl2Request(Vl2Request { mac: MAC, vnet_id: 1 }), 12)]
#[case(Message::Vl2Ack(Vl2Ack::empty(StatusCode::Ok)), 20)]
#[case(Message::Vl3Request(Vl3Request { ip: Ipv6Addr::LOCALHOST, vnet_id: 1 }), 24)]
#[case(Message::Vl3Ack(Vl3Ack::empty(StatusCode::Ok)), 28)]
#[case(Message::LogRequest(LogRequest { ip: Ipv6Addr::LOCALHOST, byte_budget: 1 }), 20)]
#[case(Message::LogAck(LogAck::empty(StatusCode::Ok)), 4)]
#[case(Message::LogRemove(LogRemove { ids: vec![Uuid::nil(), Uuid::from_u128(u128::MAX)] }), 36)]
#[case(Message::LogRemoveAck(LogRemoveAck { status: StatusCode::Ok }), 4)]
#[case(Message::RouteRequest(RouteRequest { vnet_id: 1, vlan_id: 2, src_ip: Ipv6Addr::LOCALHOST, dst_ip: Ipv6Addr::LOCALHOST }), 40)]
#[case(Message::RouteAck(RouteAck::empty(StatusCode::Ok)), 46)]
fn payload_sizes_match_layouts(#[case] message: Message, #[case] len: usize) {
    assert_eq!(payload_of(message).len(), len);
}

#[test]
fn vl2_request_layout() {
    let payload = payload_of(Message::Vl2Request(Vl2Request {
        mac: MAC,
        vnet_id: 12340,
    }));
    assert_eq!(
        payload.as_ref(),
        &[0x00, 0x0a, 0x95, 0x9d, 0x68, 0x16, 0, 0, 0x00, 0x00, 0x30, 0x34]
    );
}

#[test]
fn vl2_ack_carries_sixteen_bit_status() {
    let payload = payload_of(Message::Vl2Ack(Vl2Ack {
        status: StatusCode::NotFound,
        port: 123,
        addr: mapped(192, 168, 1, 1),
    }));
    assert_eq!(&payload[..4], &[0, 2, 0, 123]);
    assert_eq!(&payload[4..], &mapped(192, 168, 1, 1).octets());
}

#[rstest]
#[case(mapped(10, 0, 0, 1), 1)]
#[case("fd00::1".parse().expect("ipv6"), 2)]
fn vl3_request_derives_l3_type(#[case] ip: Ipv6Addr, #[case] l3_type: u32) {
    let payload = payload_of(Message::Vl3Request(Vl3Request { ip, vnet_id: 7 }));
    assert_eq!(&payload[16..20], &l3_type.to_be_bytes());
    assert_eq!(&payload[20..24], &7u32.to_be_bytes());
}

#[test]
fn vl3_request_with_unknown_l3_type_is_malformed() {
    let mut payload = BytesMut::new();
    payload.put_slice(&mapped(10, 0, 0, 1).octets());
    payload.put_u32(9);
    payload.put_u32(1);
    assert_eq!(
        decode(&raw_frame(Opcode::Vl3Request, &payload)),
        Err(DecodeError::UnknownL3Type(9))
    );
}

#[test]
fn log_entries_use_their_own_widths() {
    let entries = vec![
        LogEntry::Vl2(Vl2Log {
            id: Uuid::from_u128(1),
            mac: MAC,
            vnet_id: 5,
        }),
        LogEntry::Route(RouteLog {
            id: Uuid::from_u128(2),
            src_vnet_id: 1,
            dst_vnet_id: 2,
            dc_id: 3,
            src_ip: mapped(10, 0, 0, 0),
            dst_ip: mapped(10, 1, 0, 0),
            src_vlan: 4,
            dst_vlan: 5,
            src_prefix_len: 120,
            dst_prefix_len: 112,
        }),
        LogEntry::Vl3(Vl3Log {
            id: Uuid::from_u128(3),
            ip: mapped(10, 0, 0, 9),
            vlan: 6,
            vnet_id: 5,
        }),
    ];
    let payload = payload_of(Message::LogAck(LogAck {
        status: StatusCode::Ok,
        entries: entries.clone(),
    }));
    assert_eq!(payload.len(), 4 + VL2_LOG_LEN + ROUTE_LOG_LEN + VL3_LOG_LEN);
    assert_eq!(&payload[4..8], &1u32.to_be_bytes());
    assert_eq!(&payload[4 + VL2_LOG_LEN..8 + VL2_LOG_LEN], &3u32.to_be_bytes());

    let decoded = decode(&raw_frame(Opcode::LogAck, &payload)).expect("decode");
    assert_eq!(
        decoded.message,
        Message::LogAck(LogAck {
            status: StatusCode::Ok,
            entries
        })
    );
}

#[test]
fn log_entry_overrunning_payload_is_malformed() {
    let mut payload = BytesMut::new();
    payload.put_u32(0);
    payload.put_u32(2);
    payload.put_bytes(0, VL3_LOG_LEN - 5);
    assert_eq!(
        decode(&raw_frame(Opcode::LogAck, &payload)),
        Err(DecodeError::ElementOverrun {
            offset: 4,
            need: VL3_LOG_LEN,
            remaining: VL3_LOG_LEN - 1,
        })
    );
}

#[test]
fn unknown_log_entry_type_is_malformed() {
    let mut payload = BytesMut::new();
    payload.put_u32(0);
    payload.put_u32(77);
    payload.put_bytes(0, 28);
    assert_eq!(
        decode(&raw_frame(Opcode::LogAck, &payload)),
        Err(DecodeError::UnknownLogType { kind: 77, offset: 4 })
    );
}

#[test]
fn truncated_log_entry_tag_is_malformed() {
    let payload = [0, 0, 0, 0, 0, 0];
    assert_eq!(
        decode(&raw_frame(Opcode::LogAck, &payload)),
        Err(DecodeError::ElementOverrun {
            offset: 4,
            need: 4,
            remaining: 2,
        })
    );
}

#[rstest]
#[case(2, 2 * 16 + 3, DecodeError::ElementOverrun { offset: 36, need: 16, remaining: 3 })]
#[case(3, 2 * 16, DecodeError::CountMismatch { declared: 3, actual: 2 })]
fn log_remove_ids_must_match_count(
    #[case] count: u32,
    #[case] id_bytes: usize,
    #[case] expected: DecodeError,
) {
    let mut payload = BytesMut::new();
    payload.put_u32(count);
    payload.put_bytes(0xab, id_bytes);
    assert_eq!(decode(&raw_frame(Opcode::LogRemove, &payload)), Err(expected));
}

#[rstest]
#[case(Opcode::Vl2Request, 11)]
#[case(Opcode::Vl3Ack, 27)]
#[case(Opcode::RouteAck, 45)]
#[case(Opcode::LogRemoveAck, 0)]
fn short_fixed_payload_is_truncated(#[case] opcode: Opcode, #[case] have: usize) {
    let err = decode(&raw_frame(opcode, &vec![0; have])).expect_err("short payload");
    assert!(matches!(err, DecodeError::Truncated { have: h, .. } if h == have));
}

#[test]
fn trailing_bytes_after_fixed_layout_are_ignored() {
    let mut payload = BytesMut::from(
        payload_of(Message::Vl2Request(Vl2Request {
            mac: MAC,
            vnet_id: 9,
        }))
        .as_ref(),
    );
    payload.put_slice(b"junk");
    let decoded = decode(&raw_frame(Opcode::Vl2Request, &payload)).expect("decode");
    assert_eq!(
        decoded.message,
        Message::Vl2Request(Vl2Request {
            mac: MAC,
            vnet_id: 9
        })
    );
}

#[rstest]
#[case(Opcode::BulkRequest)]
#[case(Opcode::BulkAck)]
fn bulk_opcodes_are_unsupported(#[case] opcode: Opcode) {
    assert_eq!(
        decode(&raw_frame(opcode, &[0; 8])),
        Err(DecodeError::UnsupportedOpcode(opcode.as_u16()))
    );
}

#[test]
fn unknown_opcode_is_unsupported() {
    let mut frame = raw_frame(Opcode::Ping, &[]);
    frame.header.opcode = 0x42;
    assert_eq!(decode(&frame), Err(DecodeError::UnsupportedOpcode(0x42)));
}

#[test]
fn unknown_status_is_malformed() {
    assert_eq!(
        decode(&raw_frame(Opcode::LogRemoveAck, &[0, 0, 0, 9])),
        Err(DecodeError::UnknownStatus(9))
    );
}

#[test]
fn shootdown_payload_is_opaque() {
    let decoded = decode(&raw_frame(Opcode::Shootdown, b"\x01\x02\x03")).expect("decode");
    assert_eq!(
        decoded.message,
        Message::Shootdown(Bytes::from_static(b"\x01\x02\x03"))
    );
}

#[test]
fn reply_echoes_version_and_request_id() {
    let request = Envelope {
        version: VERSION_ONE,
        request_id: 0xfeed,
        message: Message::Ping,
    };
    let reply = request.reply(Message::Pong);
    assert_eq!(reply.version, VERSION_ONE);
    assert_eq!(reply.request_id, 0xfeed);
    assert_eq!(reply.opcode(), Opcode::Pong);
}

#[test]
fn requests_stamp_current_version() {
    let envelope = Envelope::request(3, Message::Ping);
    let frame = encode(&envelope).expect("encode");
    assert_eq!(frame.version(), CURRENT_VERSION);
    assert_eq!(frame.encoded_len(), HEADER_LEN);
}
