//! Request dispatch.
//!
//! The [`Dispatcher`] maps each decoded request onto backend lookups and
//! builds the matching acknowledgement. Every recognised request is
//! answered: a missing mapping yields `NOTFOUND`, while a backend failure or
//! timeout yields the request family's acknowledgement with status `FATAL`
//! and every other field zeroed. Messages that are not requests are logged
//! and produce no response.

use std::{
    collections::HashMap,
    future::Future,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use ipnet::IpNet;

use crate::{
    backend::{Backend, BackendError, RouteMapping, RouteQuery},
    client::{ClientError, PortolanClient},
    message::{
        Envelope,
        LogAck,
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
        log::MIN_LOG_ENTRY_LEN,
    },
    metrics,
    protocol::{
        CURRENT_VERSION,
        DEFAULT_MAX_PAYLOAD_SIZE,
        StatusCode,
        VERSION_ONE,
        from_wire_ip,
        to_wire_ip,
    },
};

/// Bytes of a `LogAck` payload ahead of its entries.
const LOG_ACK_STATUS_LEN: usize = 4;

/// Default bound on a single handler.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on one remote lookup attempt.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default number of remote lookup attempts.
pub const DEFAULT_REMOTE_ATTEMPTS: u32 = 2;

/// State shared by every connection of a server.
///
/// Built once at startup and handed to each connection behind an [`Arc`].
pub struct ServerContext {
    pub backend: Arc<dyn Backend>,
    /// Upper bound on each handler, backend calls included.
    pub backend_timeout: Duration,
    /// Data center this server answers for.
    pub data_center_id: u32,
    /// Servers answering VL3 lookups for other data centers.
    pub route_peers: HashMap<u32, SocketAddr>,
    pub remote_timeout: Duration,
    pub remote_attempts: u32,
    /// Largest payload the connection codec will write.
    pub max_payload_size: usize,
}

impl ServerContext {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            data_center_id: 0,
            route_peers: HashMap::new(),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            remote_attempts: DEFAULT_REMOTE_ATTEMPTS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    #[must_use]
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_data_center(mut self, dc_id: u32) -> Self {
        self.data_center_id = dc_id;
        self
    }

    /// Register the server resolving destinations in data center `dc_id`.
    #[must_use]
    pub fn with_route_peer(mut self, dc_id: u32, addr: SocketAddr) -> Self {
        self.route_peers.insert(dc_id, addr);
        self
    }

    #[must_use]
    pub fn with_remote_policy(mut self, timeout: Duration, attempts: u32) -> Self {
        self.remote_timeout = timeout;
        self.remote_attempts = attempts.max(1);
        self
    }

    /// Match the payload cap of the codec replies are written with.
    #[must_use]
    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Peer to ask for destinations in `dc_id`, if they are not local.
    fn peer_for(&self, dc_id: u32) -> Option<SocketAddr> {
        if dc_id == self.data_center_id {
            return None;
        }
        self.route_peers.get(&dc_id).copied()
    }
}

/// Turns requests into responses using a shared [`ServerContext`].
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>) -> Self { Self { ctx } }

    #[must_use]
    pub fn context(&self) -> &ServerContext { &self.ctx }

    /// Handle one request.
    ///
    /// Returns the response to send, echoing the request's version and
    /// request id, or `None` if `request` is not a request.
    pub async fn dispatch(&self, request: &Envelope) -> Option<Envelope> {
        let request_id = request.request_id;
        if !(VERSION_ONE..=CURRENT_VERSION).contains(&request.version) {
            tracing::debug!(request_id, version = request.version, "unrecognised protocol version");
        }
        let reply = match &request.message {
            Message::Ping => Message::Pong,
            Message::Vl2Request(req) => Message::Vl2Ack(
                self.bounded(request_id, self.vl2(*req))
                    .await
                    .unwrap_or(Vl2Ack::empty(StatusCode::Fatal)),
            ),
            Message::Vl3Request(req) => Message::Vl3Ack(
                self.bounded(request_id, self.vl3(*req))
                    .await
                    .unwrap_or(Vl3Ack::empty(StatusCode::Fatal)),
            ),
            Message::LogRequest(req) => Message::LogAck(
                self.bounded(request_id, self.log(*req))
                    .await
                    .unwrap_or(LogAck::empty(StatusCode::Fatal)),
            ),
            Message::LogRemove(req) => Message::LogRemoveAck(
                self.bounded(request_id, self.log_remove(req))
                    .await
                    .unwrap_or(LogRemoveAck {
                        status: StatusCode::Fatal,
                    }),
            ),
            Message::RouteRequest(req) => Message::RouteAck(
                self.bounded(request_id, self.route(*req))
                    .await
                    .unwrap_or(RouteAck::empty(StatusCode::Fatal)),
            ),
            Message::Pong
            | Message::Vl2Ack(_)
            | Message::Vl3Ack(_)
            | Message::LogAck(_)
            | Message::LogRemoveAck(_)
            | Message::RouteAck(_)
            | Message::Shootdown(_) => {
                tracing::debug!(
                    request_id,
                    opcode = %request.opcode(),
                    "ignoring message that is not a request"
                );
                return None;
            }
        };
        Some(request.reply(reply))
    }

    /// Run a handler under the backend timeout, logging any failure.
    async fn bounded<T>(
        &self,
        request_id: u32,
        handler: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        let limit = self.ctx.backend_timeout;
        let result = match tokio::time::timeout(limit, handler).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(limit)),
        };
        if let Err(err) = &result {
            tracing::warn!(request_id, error = %err, "request handler failed");
            metrics::inc_errors(err.kind());
        }
        result
    }

    async fn vl2(&self, req: Vl2Request) -> Result<Vl2Ack, BackendError> {
        let backend = &self.ctx.backend;
        let Some(overlay) = backend
            .lookup_overlay_mac(req.mac, req.vnet_id)
            .await?
            .filter(|mapping| !mapping.deleted)
        else {
            return Ok(Vl2Ack::empty(StatusCode::NotFound));
        };
        let Some(underlay) = backend.lookup_underlay(overlay.cn_id).await? else {
            return Ok(Vl2Ack::empty(StatusCode::NotFound));
        };
        Ok(Vl2Ack {
            status: StatusCode::Ok,
            port: underlay.port,
            addr: to_wire_ip(underlay.ip),
        })
    }

    async fn vl3(&self, req: Vl3Request) -> Result<Vl3Ack, BackendError> {
        let backend = &self.ctx.backend;
        let ip = from_wire_ip(req.ip);
        let Some(overlay) = backend
            .lookup_overlay_ip(ip, req.vnet_id)
            .await?
            .filter(|mapping| !mapping.deleted)
        else {
            return Ok(Vl3Ack::empty(StatusCode::NotFound));
        };
        let Some(underlay) = backend.lookup_underlay(overlay.cn_id).await? else {
            return Ok(Vl3Ack::empty(StatusCode::NotFound));
        };
        Ok(Vl3Ack {
            status: StatusCode::Ok,
            mac: overlay.mac,
            port: underlay.port,
            addr: to_wire_ip(underlay.ip),
        })
    }

    async fn log(&self, req: LogRequest) -> Result<LogAck, BackendError> {
        let backend = &self.ctx.backend;
        let Some(underlay) = backend.lookup_underlay_by_ip(from_wire_ip(req.ip)).await? else {
            return Ok(LogAck::empty(StatusCode::NotFound));
        };
        // The ack must still fit in one frame after its status word.
        let budget = (req.byte_budget as usize)
            .min(self.ctx.max_payload_size.saturating_sub(LOG_ACK_STATUS_LEN));
        let fetched = backend
            .fetch_log(underlay.cn_id, budget / MIN_LOG_ENTRY_LEN)
            .await?;

        let mut used = 0;
        let entries = fetched
            .into_iter()
            .take_while(|entry| {
                used += entry.encoded_len();
                used <= budget
            })
            .collect();
        Ok(LogAck {
            status: StatusCode::Ok,
            entries,
        })
    }

    async fn log_remove(&self, req: &LogRemove) -> Result<LogRemoveAck, BackendError> {
        let outcomes = self.ctx.backend.remove_log(&req.ids).await?;
        let missing = outcomes
            .iter()
            .filter(|outcome| **outcome == crate::backend::LogRemoval::Missing)
            .count();
        if missing > 0 {
            log::debug!("{missing} of {} log entries were already removed", req.ids.len());
        }
        Ok(LogRemoveAck {
            status: StatusCode::Ok,
        })
    }

    async fn route(&self, req: RouteRequest) -> Result<RouteAck, BackendError> {
        let query = RouteQuery {
            vnet_id: req.vnet_id,
            vlan_id: req.vlan_id,
            src_ip: from_wire_ip(req.src_ip),
            dst_ip: from_wire_ip(req.dst_ip),
        };
        let Some(route) = self.ctx.backend.lookup_route(query).await? else {
            return Ok(RouteAck::empty(StatusCode::NotFound));
        };

        let dst = self.resolve_destination(&route, query.dst_ip).await?;
        match dst.status {
            StatusCode::Ok => {}
            StatusCode::NotFound => return Ok(RouteAck::empty(StatusCode::NotFound)),
            other => {
                return Err(BackendError::Remote(format!(
                    "destination lookup returned {}",
                    other.name()
                )));
            }
        }
        Ok(RouteAck {
            status: StatusCode::Ok,
            dc_id: route.dc_id,
            vnet_id: route.dst_vnet_id,
            vlan_id: route.dst_vlan_id,
            src_prefix_len: wire_prefix_len(route.src_subnet),
            dst_prefix_len: wire_prefix_len(route.dst_subnet),
            src_mac: route.src_mac,
            dst_mac: dst.mac,
            port: dst.port,
            underlay_ip: dst.addr,
        })
    }

    /// VL3 lookup of `dst_ip` on the route's destination network, asking the
    /// owning data center's server when it is not this one.
    async fn resolve_destination(
        &self,
        route: &RouteMapping,
        dst_ip: IpAddr,
    ) -> Result<Vl3Ack, BackendError> {
        match self.ctx.peer_for(route.dc_id) {
            Some(peer) => self.remote_vl3(peer, dst_ip, route.dst_vnet_id).await,
            None => {
                self.vl3(Vl3Request {
                    ip: to_wire_ip(dst_ip),
                    vnet_id: route.dst_vnet_id,
                })
                .await
            }
        }
    }

    async fn remote_vl3(
        &self,
        peer: SocketAddr,
        ip: IpAddr,
        vnet_id: u32,
    ) -> Result<Vl3Ack, BackendError> {
        let attempts = self.ctx.remote_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.try_remote_vl3(peer, ip, vnet_id).await {
                Ok(ack) => return Ok(ack),
                Err(err) => {
                    tracing::warn!(
                        %peer,
                        error = %err,
                        "remote lookup failed (attempt {attempt}/{attempts})"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(BackendError::Remote(
            last_error.map_or_else(|| format!("no attempt made against {peer}"), |e| e.to_string()),
        ))
    }

    async fn try_remote_vl3(
        &self,
        peer: SocketAddr,
        ip: IpAddr,
        vnet_id: u32,
    ) -> Result<Vl3Ack, ClientError> {
        let mut client = PortolanClient::connect(peer, self.ctx.remote_timeout).await?;
        client.vl3(ip, vnet_id).await
    }
}

/// Prefix length in the IPv6 form carried on the wire.
fn wire_prefix_len(net: IpNet) -> u8 {
    match net {
        IpNet::V4(v4) => v4.prefix_len() + 96,
        IpNet::V6(v6) => v6.prefix_len(),
    }
}

#[cfg(test)]
mod tests;
