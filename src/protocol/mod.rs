//! Constants and enumerations of the SVP lookup protocol.
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────────┬────────────────┬─────────────┐
//! │ version (u16)│ opcode (u16)│ payload_size(u32)│ request_id(u32)│ crc32 (u32) │
//! └──────────────┴─────────────┴──────────────────┴────────────────┴─────────────┘
//!   0              2             4                  8                12..16
//! ```
//!
//! Every integer is carried in network byte order and every address is
//! carried as 16 bytes (IPv4 addresses use the IPv4-mapped IPv6 form).

mod address;
pub(crate) mod header;

pub use address::{MacAddress, ParseMacError, from_wire_ip, to_wire_ip};
pub use header::FrameHeader;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 16;
/// Byte offset of the `crc32` field inside the header.
pub const CRC_OFFSET: usize = 12;
/// Width of the `crc32` field.
pub const CRC_LEN: usize = 4;

/// First protocol version (ping, VL2, VL3, log operations).
pub const VERSION_ONE: u16 = 1;
/// Second protocol version, adding route resolution.
pub const VERSION_TWO: u16 = 2;
/// Version stamped on requests this side initiates.
pub const CURRENT_VERSION: u16 = VERSION_TWO;

/// Default TCP port the lookup service listens on.
pub const DEFAULT_PORT: u16 = 1296;
/// Default UDP port for VXLAN encapsulated traffic.
pub const VXLAN_PORT: u16 = 4789;

/// Default cap on a single frame's payload.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Operation code carried in every frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Ping = 0x01,
    Pong = 0x02,
    Vl2Request = 0x03,
    Vl2Ack = 0x04,
    Vl3Request = 0x05,
    Vl3Ack = 0x06,
    BulkRequest = 0x07,
    BulkAck = 0x08,
    LogRequest = 0x09,
    LogAck = 0x0A,
    LogRemove = 0x0B,
    LogRemoveAck = 0x0C,
    Shootdown = 0x0D,
    RouteRequest = 0x0E,
    RouteAck = 0x0F,
}

impl Opcode {
    /// Every opcode with a defined meaning, in numeric order.
    pub const ALL: [Opcode; 15] = [
        Opcode::Ping,
        Opcode::Pong,
        Opcode::Vl2Request,
        Opcode::Vl2Ack,
        Opcode::Vl3Request,
        Opcode::Vl3Ack,
        Opcode::BulkRequest,
        Opcode::BulkAck,
        Opcode::LogRequest,
        Opcode::LogAck,
        Opcode::LogRemove,
        Opcode::LogRemoveAck,
        Opcode::Shootdown,
        Opcode::RouteRequest,
        Opcode::RouteAck,
    ];

    /// Numeric value written on the wire.
    #[must_use]
    pub const fn as_u16(self) -> u16 { self as u16 }

    /// Size of the fixed portion of this opcode's payload.
    ///
    /// For variable-length bodies this is the fixed prefix only. Returns
    /// `None` for opcodes without a message layout.
    #[must_use]
    pub const fn fixed_payload_len(self) -> Option<usize> {
        match self {
            Opcode::Ping | Opcode::Pong | Opcode::Shootdown => Some(0),
            Opcode::Vl2Request => Some(12),
            Opcode::Vl2Ack => Some(20),
            Opcode::Vl3Request => Some(24),
            Opcode::Vl3Ack => Some(28),
            Opcode::LogRequest => Some(20),
            Opcode::LogAck | Opcode::LogRemove | Opcode::LogRemoveAck => Some(4),
            Opcode::RouteRequest => Some(40),
            Opcode::RouteAck => Some(46),
            Opcode::BulkRequest | Opcode::BulkAck => None,
        }
    }

    /// The acknowledgement answering this request opcode, if it is a request.
    #[must_use]
    pub const fn ack(self) -> Option<Opcode> {
        match self {
            Opcode::Ping => Some(Opcode::Pong),
            Opcode::Vl2Request => Some(Opcode::Vl2Ack),
            Opcode::Vl3Request => Some(Opcode::Vl3Ack),
            Opcode::BulkRequest => Some(Opcode::BulkAck),
            Opcode::LogRequest => Some(Opcode::LogAck),
            Opcode::LogRemove => Some(Opcode::LogRemoveAck),
            Opcode::RouteRequest => Some(Opcode::RouteAck),
            _ => None,
        }
    }

    /// Short lowercase name used in logs and metric labels.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Ping => "ping",
            Opcode::Pong => "pong",
            Opcode::Vl2Request => "vl2_req",
            Opcode::Vl2Ack => "vl2_ack",
            Opcode::Vl3Request => "vl3_req",
            Opcode::Vl3Ack => "vl3_ack",
            Opcode::BulkRequest => "bulk_req",
            Opcode::BulkAck => "bulk_ack",
            Opcode::LogRequest => "log_req",
            Opcode::LogAck => "log_ack",
            Opcode::LogRemove => "log_rm",
            Opcode::LogRemoveAck => "log_rm_ack",
            Opcode::Shootdown => "shootdown",
            Opcode::RouteRequest => "route_req",
            Opcode::RouteAck => "route_ack",
        }
    }
}

impl TryFrom<u16> for Opcode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.as_u16() == value)
            .ok_or(value)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

/// Outcome carried by every acknowledgement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    /// Everything OK.
    #[default]
    Ok = 0,
    /// The responder failed while handling the request.
    Fatal = 1,
    /// No mapping exists for the requested key.
    NotFound = 2,
    /// Unknown layer-three address type.
    BadL3Type = 3,
    /// Unknown bulk request type.
    BadBulk = 4,
    /// Unknown log entry type.
    BadLog = 5,
    /// Nothing in the log yet.
    LogAgain = 6,
}

impl StatusCode {
    /// Numeric value written on the wire.
    #[must_use]
    pub const fn as_u32(self) -> u32 { self as u32 }

    /// Lowercase label for logs and metrics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::Fatal => "fatal",
            StatusCode::NotFound => "notfound",
            StatusCode::BadL3Type => "bad_l3_type",
            StatusCode::BadBulk => "bad_bulk",
            StatusCode::BadLog => "bad_log",
            StatusCode::LogAgain => "log_again",
        }
    }
}

impl TryFrom<u32> for StatusCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatusCode::Ok),
            1 => Ok(StatusCode::Fatal),
            2 => Ok(StatusCode::NotFound),
            3 => Ok(StatusCode::BadL3Type),
            4 => Ok(StatusCode::BadBulk),
            5 => Ok(StatusCode::BadLog),
            6 => Ok(StatusCode::LogAgain),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

/// Address family discriminator carried by VL3 requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum L3Type {
    /// IPv4 address in IPv4-mapped form.
    Ipv4 = 1,
    /// Native IPv6 address.
    Ipv6 = 2,
}

impl L3Type {
    /// Classify a wire address.
    #[must_use]
    pub fn of(ip: &std::net::Ipv6Addr) -> Self {
        if ip.to_ipv4_mapped().is_some() {
            L3Type::Ipv4
        } else {
            L3Type::Ipv6
        }
    }
}

impl TryFrom<u32> for L3Type {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(L3Type::Ipv4),
            2 => Ok(L3Type::Ipv6),
            other => Err(other),
        }
    }
}
