//! Message to frame encoding.

use bytes::{BufMut, BytesMut};

use super::{Envelope, Message};
use crate::{
    codec::EncodeError,
    frame::Frame,
    protocol::{L3Type, MacAddress},
};

/// Serialise an envelope into a frame.
///
/// The frame's `payload_size` and checksum are filled in by the codec when
/// it is written.
///
/// # Errors
///
/// Returns [`EncodeError::PayloadTooLarge`] if a sequence is too long for
/// its `u32` count field.
pub fn encode(envelope: &Envelope) -> Result<Frame, EncodeError> {
    let opcode = envelope.opcode();
    let mut dst = BytesMut::with_capacity(opcode.fixed_payload_len().unwrap_or(0));
    put_body(&envelope.message, &mut dst)?;
    Ok(Frame::new(
        envelope.version,
        opcode,
        envelope.request_id,
        dst.freeze(),
    ))
}

fn put_body(message: &Message, dst: &mut BytesMut) -> Result<(), EncodeError> {
    match message {
        Message::Ping | Message::Pong => {}
        Message::Vl2Request(req) => {
            put_mac(dst, req.mac);
            dst.put_bytes(0, 2);
            dst.put_u32(req.vnet_id);
        }
        Message::Vl2Ack(ack) => {
            // VL2 acks carry a 16-bit status; every defined code fits.
            dst.put_u16(ack.status as u16);
            dst.put_u16(ack.port);
            dst.put_slice(&ack.addr.octets());
        }
        Message::Vl3Request(req) => {
            dst.put_slice(&req.ip.octets());
            dst.put_u32(L3Type::of(&req.ip) as u32);
            dst.put_u32(req.vnet_id);
        }
        Message::Vl3Ack(ack) => {
            dst.put_u32(ack.status.as_u32());
            put_mac(dst, ack.mac);
            dst.put_u16(ack.port);
            dst.put_slice(&ack.addr.octets());
        }
        Message::LogRequest(req) => {
            dst.put_u32(req.byte_budget);
            dst.put_slice(&req.ip.octets());
        }
        Message::LogAck(ack) => {
            dst.reserve(ack.entries.iter().map(super::LogEntry::encoded_len).sum());
            dst.put_u32(ack.status.as_u32());
            for entry in &ack.entries {
                entry.put(dst);
            }
        }
        Message::LogRemove(remove) => {
            let count = u32::try_from(remove.ids.len()).map_err(|_| EncodeError::PayloadTooLarge {
                size: remove.ids.len().saturating_mul(16),
                max: u32::MAX as usize,
            })?;
            dst.put_u32(count);
            for id in &remove.ids {
                dst.put_slice(id.as_bytes());
            }
        }
        Message::LogRemoveAck(ack) => dst.put_u32(ack.status.as_u32()),
        Message::Shootdown(payload) => dst.put_slice(payload),
        Message::RouteRequest(req) => {
            dst.put_u32(req.vnet_id);
            dst.put_u16(req.vlan_id);
            dst.put_bytes(0, 2);
            dst.put_slice(&req.src_ip.octets());
            dst.put_slice(&req.dst_ip.octets());
        }
        Message::RouteAck(ack) => {
            dst.put_u32(ack.status.as_u32());
            dst.put_u32(ack.dc_id);
            dst.put_u32(ack.vnet_id);
            dst.put_u16(ack.vlan_id);
            dst.put_u16(ack.port);
            dst.put_slice(&ack.underlay_ip.octets());
            put_mac(dst, ack.src_mac);
            put_mac(dst, ack.dst_mac);
            dst.put_u8(ack.src_prefix_len);
            dst.put_u8(ack.dst_prefix_len);
        }
    }
    Ok(())
}

fn put_mac(dst: &mut BytesMut, mac: MacAddress) { dst.put_slice(&mac.octets()); }
