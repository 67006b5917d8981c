//! Frame to message decoding.

use std::net::Ipv6Addr;

use bytes::{Buf, Bytes};
use uuid::Uuid;

use super::{
    Envelope,
    LogAck,
    LogEntry,
    LogRemove,
    LogRemoveAck,
    LogRequest,
    Message,
    RouteAck,
    RouteRequest,
    Vl2Ack,
    Vl2Request,
    Vl3Ack,
    Vl3Request,
};
use crate::{
    codec::DecodeError,
    frame::Frame,
    protocol::{L3Type, MacAddress, Opcode, StatusCode},
};

const UUID_LEN: usize = 16;

/// Interpret a validated frame as a typed message.
///
/// Fixed-layout payloads shorter than their layout are rejected; bytes past
/// the layout are ignored. Variable-length sections must end exactly at the
/// payload's end.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the opcode has no message layout or the
/// payload is malformed. No response should be synthesised for either.
pub fn decode(frame: &Frame) -> Result<Envelope, DecodeError> {
    let opcode =
        Opcode::try_from(frame.header.opcode).map_err(DecodeError::UnsupportedOpcode)?;
    let message = decode_body(opcode, &frame.payload)?;
    Ok(Envelope {
        version: frame.header.version,
        request_id: frame.header.request_id,
        message,
    })
}

fn decode_body(opcode: Opcode, payload: &Bytes) -> Result<Message, DecodeError> {
    let Some(need) = opcode.fixed_payload_len() else {
        return Err(DecodeError::UnsupportedOpcode(opcode.as_u16()));
    };
    if payload.len() < need {
        return Err(DecodeError::Truncated {
            opcode,
            have: payload.len(),
            need,
        });
    }

    let mut buf: &[u8] = payload;
    let message = match opcode {
        Opcode::Ping => Message::Ping,
        Opcode::Pong => Message::Pong,
        Opcode::Vl2Request => {
            let mac = get_mac(&mut buf);
            buf.advance(2);
            Message::Vl2Request(Vl2Request {
                mac,
                vnet_id: buf.get_u32(),
            })
        }
        Opcode::Vl2Ack => {
            let status = get_status(u32::from(buf.get_u16()))?;
            Message::Vl2Ack(Vl2Ack {
                status,
                port: buf.get_u16(),
                addr: get_ip(&mut buf),
            })
        }
        Opcode::Vl3Request => {
            let ip = get_ip(&mut buf);
            L3Type::try_from(buf.get_u32()).map_err(DecodeError::UnknownL3Type)?;
            Message::Vl3Request(Vl3Request {
                ip,
                vnet_id: buf.get_u32(),
            })
        }
        Opcode::Vl3Ack => Message::Vl3Ack(Vl3Ack {
            status: get_status(buf.get_u32())?,
            mac: get_mac(&mut buf),
            port: buf.get_u16(),
            addr: get_ip(&mut buf),
        }),
        Opcode::LogRequest => Message::LogRequest(LogRequest {
            byte_budget: buf.get_u32(),
            ip: get_ip(&mut buf),
        }),
        Opcode::LogAck => Message::LogAck(LogAck {
            status: get_status(buf.get_u32())?,
            entries: decode_log_entries(buf, need)?,
        }),
        Opcode::LogRemove => {
            let declared = buf.get_u32() as usize;
            Message::LogRemove(LogRemove {
                ids: decode_ids(buf, declared, need)?,
            })
        }
        Opcode::LogRemoveAck => Message::LogRemoveAck(LogRemoveAck {
            status: get_status(buf.get_u32())?,
        }),
        Opcode::Shootdown => Message::Shootdown(payload.clone()),
        Opcode::RouteRequest => {
            let vnet_id = buf.get_u32();
            let vlan_id = buf.get_u16();
            buf.advance(2);
            Message::RouteRequest(RouteRequest {
                vnet_id,
                vlan_id,
                src_ip: get_ip(&mut buf),
                dst_ip: get_ip(&mut buf),
            })
        }
        Opcode::RouteAck => Message::RouteAck(RouteAck {
            status: get_status(buf.get_u32())?,
            dc_id: buf.get_u32(),
            vnet_id: buf.get_u32(),
            vlan_id: buf.get_u16(),
            port: buf.get_u16(),
            underlay_ip: get_ip(&mut buf),
            src_mac: get_mac(&mut buf),
            dst_mac: get_mac(&mut buf),
            src_prefix_len: buf.get_u8(),
            dst_prefix_len: buf.get_u8(),
        }),
        Opcode::BulkRequest | Opcode::BulkAck => {
            return Err(DecodeError::UnsupportedOpcode(opcode.as_u16()));
        }
    };
    Ok(message)
}

/// Read self-describing entries until `rest` is exhausted.
///
/// `base` is the payload offset of `rest`, used in error reports.
fn decode_log_entries(mut rest: &[u8], base: usize) -> Result<Vec<LogEntry>, DecodeError> {
    let mut entries = Vec::new();
    let mut offset = base;
    while !rest.is_empty() {
        let Some(mut tag) = rest.get(..4) else {
            return Err(DecodeError::ElementOverrun {
                offset,
                need: 4,
                remaining: rest.len(),
            });
        };
        let kind = tag.get_u32();
        let width = LogEntry::width_of(kind).ok_or(DecodeError::UnknownLogType { kind, offset })?;
        if rest.len() < width {
            return Err(DecodeError::ElementOverrun {
                offset,
                need: width,
                remaining: rest.len(),
            });
        }
        let (element, tail) = rest.split_at(width);
        let mut body = &element[4..];
        let entry =
            LogEntry::get(kind, &mut body).ok_or(DecodeError::UnknownLogType { kind, offset })?;
        entries.push(entry);
        rest = tail;
        offset += width;
    }
    Ok(entries)
}

fn decode_ids(rest: &[u8], declared: usize, base: usize) -> Result<Vec<Uuid>, DecodeError> {
    let partial = rest.len() % UUID_LEN;
    if partial != 0 {
        return Err(DecodeError::ElementOverrun {
            offset: base + rest.len() - partial,
            need: UUID_LEN,
            remaining: partial,
        });
    }
    let actual = rest.len() / UUID_LEN;
    if actual != declared {
        return Err(DecodeError::CountMismatch { declared, actual });
    }
    Ok(rest
        .chunks_exact(UUID_LEN)
        .map(|mut chunk| get_uuid(&mut chunk))
        .collect())
}

fn get_status(raw: u32) -> Result<StatusCode, DecodeError> {
    StatusCode::try_from(raw).map_err(DecodeError::UnknownStatus)
}

pub(super) fn get_mac(src: &mut &[u8]) -> MacAddress {
    let mut octets = [0u8; 6];
    src.copy_to_slice(&mut octets);
    MacAddress(octets)
}

pub(super) fn get_ip(src: &mut &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    src.copy_to_slice(&mut octets);
    Ipv6Addr::from(octets)
}

pub(super) fn get_uuid(src: &mut &[u8]) -> Uuid {
    let mut octets = [0u8; UUID_LEN];
    src.copy_to_slice(&mut octets);
    Uuid::from_bytes(octets)
}
