//! Typed protocol messages.
//!
//! A [`Message`] is the opcode-tagged body of one frame. An [`Envelope`]
//! pairs it with the header fields that are set by context rather than by the
//! body: the protocol version and the correlation `request_id`.
//!
//! [`decode`] turns a validated [`Frame`] into an envelope; [`encode`] is its
//! inverse and produces a frame ready for [`crate::codec::SvpCodec`].

use std::net::Ipv6Addr;

use bytes::Bytes;
use uuid::Uuid;

use crate::protocol::{CURRENT_VERSION, MacAddress, Opcode, StatusCode};

mod decode;
mod encode;
pub mod log;

pub use decode::decode;
pub use encode::encode;
pub use log::{LogEntry, RouteLog, Vl2Log, Vl3Log};

#[cfg(doc)]
use crate::frame::Frame;

/// Body of one frame, keyed by opcode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Ping,
    Pong,
    Vl2Request(Vl2Request),
    Vl2Ack(Vl2Ack),
    Vl3Request(Vl3Request),
    Vl3Ack(Vl3Ack),
    LogRequest(LogRequest),
    LogAck(LogAck),
    LogRemove(LogRemove),
    LogRemoveAck(LogRemoveAck),
    RouteRequest(RouteRequest),
    RouteAck(RouteAck),
    /// One-way notification; the payload is carried opaquely.
    Shootdown(Bytes),
}

impl Message {
    /// Opcode this message is carried under.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Ping => Opcode::Ping,
            Message::Pong => Opcode::Pong,
            Message::Vl2Request(_) => Opcode::Vl2Request,
            Message::Vl2Ack(_) => Opcode::Vl2Ack,
            Message::Vl3Request(_) => Opcode::Vl3Request,
            Message::Vl3Ack(_) => Opcode::Vl3Ack,
            Message::LogRequest(_) => Opcode::LogRequest,
            Message::LogAck(_) => Opcode::LogAck,
            Message::LogRemove(_) => Opcode::LogRemove,
            Message::LogRemoveAck(_) => Opcode::LogRemoveAck,
            Message::RouteRequest(_) => Opcode::RouteRequest,
            Message::RouteAck(_) => Opcode::RouteAck,
            Message::Shootdown(_) => Opcode::Shootdown,
        }
    }

    /// Status carried by an acknowledgement, if this is one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Message::Pong => Some(StatusCode::Ok),
            Message::Vl2Ack(ack) => Some(ack.status),
            Message::Vl3Ack(ack) => Some(ack.status),
            Message::LogAck(ack) => Some(ack.status),
            Message::LogRemoveAck(ack) => Some(ack.status),
            Message::RouteAck(ack) => Some(ack.status),
            _ => None,
        }
    }
}

/// A message together with its version and correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub version: u16,
    pub request_id: u32,
    pub message: Message,
}

impl Envelope {
    /// Wrap a self-initiated request, stamping the current protocol version.
    #[must_use]
    pub fn request(request_id: u32, message: Message) -> Self {
        Self {
            version: CURRENT_VERSION,
            request_id,
            message,
        }
    }

    /// Wrap a response to this envelope, echoing its version and request id.
    #[must_use]
    pub fn reply(&self, message: Message) -> Self {
        Self {
            version: self.version,
            request_id: self.request_id,
            message,
        }
    }

    #[must_use]
    pub fn opcode(&self) -> Opcode { self.message.opcode() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vl2Request {
    pub mac: MacAddress,
    pub vnet_id: u32,
}

/// VL2 lookup result: where to send frames for the requested MAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vl2Ack {
    pub status: StatusCode,
    pub port: u16,
    pub addr: Ipv6Addr,
}

impl Vl2Ack {
    /// An acknowledgement with the given status and zeroed fields.
    #[must_use]
    pub const fn empty(status: StatusCode) -> Self {
        Self {
            status,
            port: 0,
            addr: Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// VL3 lookup request. The wire `l3_type` is derived from `ip`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vl3Request {
    pub ip: Ipv6Addr,
    pub vnet_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vl3Ack {
    pub status: StatusCode,
    pub mac: MacAddress,
    pub port: u16,
    pub addr: Ipv6Addr,
}

impl Vl3Ack {
    /// An acknowledgement with the given status and zeroed fields.
    #[must_use]
    pub const fn empty(status: StatusCode) -> Self {
        Self {
            status,
            mac: MacAddress::ZERO,
            port: 0,
            addr: Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Request for pending log entries of the compute node owning `ip`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogRequest {
    pub ip: Ipv6Addr,
    /// Upper bound on the encoded size of the returned entries.
    pub byte_budget: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogAck {
    pub status: StatusCode,
    pub entries: Vec<LogEntry>,
}

impl LogAck {
    /// An acknowledgement with the given status and no entries.
    #[must_use]
    pub const fn empty(status: StatusCode) -> Self {
        Self {
            status,
            entries: Vec::new(),
        }
    }
}

/// Acknowledge processed log entries so they can be removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRemove {
    pub ids: Vec<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogRemoveAck {
    pub status: StatusCode,
}

/// Cross-network route resolution request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteRequest {
    pub vnet_id: u32,
    pub vlan_id: u16,
    pub src_ip: Ipv6Addr,
    pub dst_ip: Ipv6Addr,
}

/// Route resolution result.
///
/// `vnet_id` and `vlan_id` identify the destination network; `src_mac` is
/// the router MAC to rewrite the source with and `dst_mac`, `port` and
/// `underlay_ip` locate the destination. Prefix lengths are in IPv6 form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteAck {
    pub status: StatusCode,
    pub dc_id: u32,
    pub vnet_id: u32,
    pub vlan_id: u16,
    pub src_prefix_len: u8,
    pub dst_prefix_len: u8,
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub port: u16,
    pub underlay_ip: Ipv6Addr,
}

impl RouteAck {
    /// An acknowledgement with the given status and zeroed fields.
    #[must_use]
    pub const fn empty(status: StatusCode) -> Self {
        Self {
            status,
            dc_id: 0,
            vnet_id: 0,
            vlan_id: 0,
            src_prefix_len: 0,
            dst_prefix_len: 0,
            src_mac: MacAddress::ZERO,
            dst_mac: MacAddress::ZERO,
            port: 0,
            underlay_ip: Ipv6Addr::UNSPECIFIED,
        }
    }
}

#[cfg(test)]
mod tests;
