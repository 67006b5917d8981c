//! Replication log entries.
//!
//! Each entry carries its own leading `u32` type tag, which also fixes the
//! entry's encoded width, so a single [`super::LogAck`] can hold a
//! heterogeneous sequence.

use std::net::Ipv6Addr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::decode::{get_ip, get_mac, get_uuid};
use crate::protocol::MacAddress;

/// Type tag of a VL2 change entry.
pub const VL2_LOG_TYPE: u32 = 1;
/// Type tag of a VL3 change entry.
pub const VL3_LOG_TYPE: u32 = 2;
/// Type tag of a route change entry.
pub const ROUTE_LOG_TYPE: u32 = 3;

pub const VL2_LOG_LEN: usize = 32;
pub const VL3_LOG_LEN: usize = 44;
pub const ROUTE_LOG_LEN: usize = 72;

/// Encoded size of the smallest entry.
pub const MIN_LOG_ENTRY_LEN: usize = VL2_LOG_LEN;

/// A VL2 mapping for `mac` changed; cached lookups should be dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vl2Log {
    pub id: Uuid,
    pub mac: MacAddress,
    pub vnet_id: u32,
}

/// A VL3 mapping for `ip` changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vl3Log {
    pub id: Uuid,
    pub ip: Ipv6Addr,
    pub vlan: u16,
    pub vnet_id: u32,
}

/// A route between two networks changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLog {
    pub id: Uuid,
    pub src_vnet_id: u32,
    pub dst_vnet_id: u32,
    pub dc_id: u32,
    pub src_ip: Ipv6Addr,
    pub dst_ip: Ipv6Addr,
    pub src_vlan: u16,
    pub dst_vlan: u16,
    pub src_prefix_len: u8,
    pub dst_prefix_len: u8,
}

/// One self-describing log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Vl2(Vl2Log),
    Vl3(Vl3Log),
    Route(RouteLog),
}

impl LogEntry {
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            LogEntry::Vl2(entry) => entry.id,
            LogEntry::Vl3(entry) => entry.id,
            LogEntry::Route(entry) => entry.id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> u32 {
        match self {
            LogEntry::Vl2(_) => VL2_LOG_TYPE,
            LogEntry::Vl3(_) => VL3_LOG_TYPE,
            LogEntry::Route(_) => ROUTE_LOG_TYPE,
        }
    }

    /// Size of this entry on the wire, type tag included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            LogEntry::Vl2(_) => VL2_LOG_LEN,
            LogEntry::Vl3(_) => VL3_LOG_LEN,
            LogEntry::Route(_) => ROUTE_LOG_LEN,
        }
    }

    /// Encoded width for a type tag, or `None` if the tag is unknown.
    #[must_use]
    pub fn width_of(kind: u32) -> Option<usize> {
        match kind {
            VL2_LOG_TYPE => Some(VL2_LOG_LEN),
            VL3_LOG_TYPE => Some(VL3_LOG_LEN),
            ROUTE_LOG_TYPE => Some(ROUTE_LOG_LEN),
            _ => None,
        }
    }

    pub(crate) fn put(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.kind());
        match self {
            LogEntry::Vl2(entry) => {
                dst.put_slice(entry.id.as_bytes());
                dst.put_slice(&entry.mac.octets());
                dst.put_bytes(0, 2);
                dst.put_u32(entry.vnet_id);
            }
            LogEntry::Vl3(entry) => {
                dst.put_slice(entry.id.as_bytes());
                dst.put_slice(&entry.ip.octets());
                dst.put_bytes(0, 2);
                dst.put_u16(entry.vlan);
                dst.put_u32(entry.vnet_id);
            }
            LogEntry::Route(entry) => {
                dst.put_slice(entry.id.as_bytes());
                dst.put_u32(entry.src_vnet_id);
                dst.put_u32(entry.dst_vnet_id);
                dst.put_u32(entry.dc_id);
                dst.put_slice(&entry.src_ip.octets());
                dst.put_slice(&entry.dst_ip.octets());
                dst.put_u16(entry.src_vlan);
                dst.put_u16(entry.dst_vlan);
                dst.put_u8(entry.src_prefix_len);
                dst.put_u8(entry.dst_prefix_len);
                dst.put_bytes(0, 2);
            }
        }
    }

    /// Read one entry whose tag is `kind` from `src`.
    ///
    /// The caller guarantees `src` holds at least `width_of(kind)` bytes
    /// after the tag has been consumed.
    pub(crate) fn get(kind: u32, src: &mut &[u8]) -> Option<Self> {
        let id = get_uuid(src);
        let entry = match kind {
            VL2_LOG_TYPE => {
                let mac = get_mac(src);
                src.advance(2);
                LogEntry::Vl2(Vl2Log {
                    id,
                    mac,
                    vnet_id: src.get_u32(),
                })
            }
            VL3_LOG_TYPE => {
                let ip = get_ip(src);
                src.advance(2);
                LogEntry::Vl3(Vl3Log {
                    id,
                    ip,
                    vlan: src.get_u16(),
                    vnet_id: src.get_u32(),
                })
            }
            ROUTE_LOG_TYPE => {
                let src_vnet_id = src.get_u32();
                let dst_vnet_id = src.get_u32();
                let dc_id = src.get_u32();
                let src_ip = get_ip(src);
                let dst_ip = get_ip(src);
                let entry = RouteLog {
                    id,
                    src_vnet_id,
                    dst_vnet_id,
                    dc_id,
                    src_ip,
                    dst_ip,
                    src_vlan: src.get_u16(),
                    dst_vlan: src.get_u16(),
                    src_prefix_len: src.get_u8(),
                    dst_prefix_len: src.get_u8(),
                };
                src.advance(2);
                LogEntry::Route(entry)
            }
            _ => return None,
        };
        Some(entry)
    }
}
