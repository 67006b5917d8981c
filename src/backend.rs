//! Lookup and storage backends.
//!
//! The dispatcher only ever talks to a [`Backend`] trait object. Two
//! implementations are provided:
//!
//! - [`json::JsonStore`]: flat JSON files in a directory, single writer.
//! - [`kv::KvBackend`]: any [`kv::KvStore`] behind a read-through cache.
//!
//! Lookups return `Ok(None)` when no mapping exists; `Err` is reserved for
//! genuine malfunctions and is answered with a FATAL status.

use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    message::LogEntry,
    protocol::{MacAddress, VXLAN_PORT, to_wire_ip},
};

pub mod cache;
mod error;
pub mod json;
pub mod kv;

pub use error::BackendError;

/// Maps an overlay MAC and IP on a virtual network to a compute node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayMapping {
    pub mac: MacAddress,
    pub ip: IpAddr,
    #[serde(alias = "vid")]
    pub vnet_id: u32,
    pub cn_id: Uuid,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 { 1 }

/// Where a compute node receives encapsulated overlay traffic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlayMapping {
    pub cn_id: Uuid,
    pub ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 { VXLAN_PORT }

/// A route from a source subnet on one network to a destination subnet on
/// another, possibly in a different data center.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMapping {
    pub id: Uuid,
    pub dc_id: u32,
    pub src_vnet_id: u32,
    pub src_vlan_id: u16,
    pub src_subnet: IpNet,
    pub dst_vnet_id: u32,
    pub dst_vlan_id: u16,
    pub dst_subnet: IpNet,
    /// MAC of the router on the source network.
    pub src_mac: MacAddress,
}

/// Key of a route lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteQuery {
    pub vnet_id: u32,
    pub vlan_id: u16,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
}

impl RouteMapping {
    fn matches(&self, query: &RouteQuery) -> bool {
        self.src_vnet_id == query.vnet_id
            && self.src_vlan_id == query.vlan_id
            && self.src_subnet.contains(&query.src_ip)
            && self.dst_subnet.contains(&query.dst_ip)
    }
}

/// Pick the matching route with the longest destination prefix.
pub(crate) fn select_route<'a>(
    routes: impl IntoIterator<Item = &'a RouteMapping>,
    query: &RouteQuery,
) -> Option<&'a RouteMapping> {
    routes
        .into_iter()
        .filter(|route| route.matches(query))
        .max_by_key(|route| route.dst_subnet.prefix_len())
}

/// Partial update of an overlay mapping; `None` fields are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverlayUpdate {
    pub ip: Option<IpAddr>,
    pub cn_id: Option<Uuid>,
    pub version: Option<u32>,
    pub deleted: Option<bool>,
}

impl OverlayUpdate {
    pub(crate) fn apply(&self, mapping: &mut OverlayMapping) {
        if let Some(ip) = self.ip {
            mapping.ip = ip;
        }
        if let Some(cn_id) = self.cn_id {
            mapping.cn_id = cn_id;
        }
        if let Some(version) = self.version {
            mapping.version = version;
        }
        if let Some(deleted) = self.deleted {
            mapping.deleted = deleted;
        }
    }
}

/// Partial update of an underlay mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnderlayUpdate {
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
}

impl UnderlayUpdate {
    pub(crate) fn apply(&self, mapping: &mut UnderlayMapping) {
        if let Some(ip) = self.ip {
            mapping.ip = ip;
        }
        if let Some(port) = self.port {
            mapping.port = port;
        }
    }
}

/// Outcome of removing one log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogRemoval {
    Removed,
    /// The entry was already gone.
    Missing,
}

/// A log entry queued for a compute node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LogRecord {
    pub cn_id: Uuid,
    pub entry: LogEntry,
}

/// Compare addresses across families, treating IPv4 and its mapped form
/// as equal.
pub(crate) fn same_ip(a: IpAddr, b: IpAddr) -> bool { to_wire_ip(a) == to_wire_ip(b) }

/// Lookup and mutation capability backing the dispatcher.
///
/// Implementations must be safe for concurrent use from every connection.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Find the overlay mapping for `mac` on `vnet_id`.
    async fn lookup_overlay_mac(
        &self,
        mac: MacAddress,
        vnet_id: u32,
    ) -> Result<Option<OverlayMapping>, BackendError>;

    /// Find the overlay mapping for `ip` on `vnet_id`.
    async fn lookup_overlay_ip(
        &self,
        ip: IpAddr,
        vnet_id: u32,
    ) -> Result<Option<OverlayMapping>, BackendError>;

    async fn lookup_underlay(&self, cn_id: Uuid) -> Result<Option<UnderlayMapping>, BackendError>;

    /// Find the compute node whose underlay address is `ip`.
    async fn lookup_underlay_by_ip(
        &self,
        ip: IpAddr,
    ) -> Result<Option<UnderlayMapping>, BackendError>;

    /// Find the most specific route matching `query`.
    async fn lookup_route(&self, query: RouteQuery) -> Result<Option<RouteMapping>, BackendError>;

    /// Return up to `max_entries` pending log entries for `cn_id`, oldest first.
    async fn fetch_log(
        &self,
        cn_id: Uuid,
        max_entries: usize,
    ) -> Result<Vec<LogEntry>, BackendError>;

    /// Remove log entries by id, reporting the outcome for each id in order.
    async fn remove_log(&self, ids: &[Uuid]) -> Result<Vec<LogRemoval>, BackendError>;

    /// Queue a log entry for `cn_id`.
    async fn append_log(&self, cn_id: Uuid, entry: LogEntry) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// Fails with [`BackendError::Conflict`] if `(mac, vnet_id)` is already mapped.
    async fn add_overlay(&self, mapping: OverlayMapping) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// Fails with [`BackendError::Missing`] if no mapping exists.
    async fn update_overlay(
        &self,
        mac: MacAddress,
        vnet_id: u32,
        update: OverlayUpdate,
    ) -> Result<OverlayMapping, BackendError>;

    async fn remove_overlay(&self, mac: MacAddress, vnet_id: u32) -> Result<(), BackendError>;

    async fn add_underlay(&self, mapping: UnderlayMapping) -> Result<(), BackendError>;

    async fn update_underlay(
        &self,
        cn_id: Uuid,
        update: UnderlayUpdate,
    ) -> Result<UnderlayMapping, BackendError>;

    async fn remove_underlay(&self, cn_id: Uuid) -> Result<(), BackendError>;

    async fn add_route(&self, route: RouteMapping) -> Result<(), BackendError>;

    async fn remove_route(&self, id: Uuid) -> Result<(), BackendError>;
}
