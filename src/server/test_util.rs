//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use rstest::fixture;

use super::{Bound, PortolanServer};
use crate::{
    backend::kv::{CacheConfig, KvBackend, KvStore, MemoryKv},
    dispatch::ServerContext,
};

/// Context backed by `store` with default caching.
pub fn context_with<S>(store: S) -> Arc<ServerContext>
where
    S: KvStore + 'static,
{
    Arc::new(ServerContext::new(Arc::new(KvBackend::new(
        store,
        CacheConfig::default(),
    ))))
}

#[fixture]
pub fn context() -> Arc<ServerContext> { context_with(MemoryKv::new()) }

#[fixture]
/// Returns a bound [`StdTcpListener`] on a free port for use in tests.
///
/// Keeping the listener bound prevents another process claiming the port
/// between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

pub fn bind_server(ctx: Arc<ServerContext>, listener: StdTcpListener) -> PortolanServer<Bound> {
    PortolanServer::new(ctx)
        .workers(1)
        .bind_existing_listener(listener)
        .expect("Failed to bind")
}
