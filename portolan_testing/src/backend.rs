//! Seeded data and fault-injecting backend wrapper.

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use portolan::{
    Dispatcher,
    ServerContext,
    backend::{
        Backend,
        BackendError,
        LogRemoval,
        OverlayMapping,
        OverlayUpdate,
        RouteMapping,
        RouteQuery,
        UnderlayMapping,
        UnderlayUpdate,
        kv::{CacheConfig, KvBackend, MemoryKv},
    },
    message::LogEntry,
    protocol::MacAddress,
};
use uuid::Uuid;

/// MAC of the seeded overlay mapping.
pub const SEED_MAC: MacAddress = MacAddress([0x00, 0x0a, 0x95, 0x9d, 0x68, 0x16]);
/// Overlay IP of the seeded mapping.
pub const SEED_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
pub const SEED_VNET: u32 = 12340;
/// Compute node hosting the seeded mapping.
pub const SEED_CN: Uuid = Uuid::from_u128(0x1a6d_5cf4_6b1e_4a4e_9b0e_9a6c_1f35_2a01);
/// Underlay address of [`SEED_CN`].
pub const SEED_UNDERLAY_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
pub const SEED_UNDERLAY_PORT: u16 = 123;

/// Empty in-memory backend with default caching.
#[must_use]
pub fn memory_backend() -> Arc<dyn Backend> {
    Arc::new(KvBackend::new(MemoryKv::new(), CacheConfig::default()))
}

/// In-memory backend holding one overlay mapping and its compute node.
///
/// # Panics
///
/// Panics if seeding the in-memory store fails.
pub async fn seeded_backend() -> Arc<dyn Backend> {
    let backend = memory_backend();
    backend
        .add_overlay(OverlayMapping {
            mac: SEED_MAC,
            ip: SEED_IP,
            vnet_id: SEED_VNET,
            cn_id: SEED_CN,
            deleted: false,
            version: 1,
        })
        .await
        .expect("seed overlay");
    backend
        .add_underlay(UnderlayMapping {
            cn_id: SEED_CN,
            ip: SEED_UNDERLAY_IP,
            port: SEED_UNDERLAY_PORT,
        })
        .await
        .expect("seed underlay");
    backend
}

/// Default context around `backend`.
#[must_use]
pub fn context_for(backend: Arc<dyn Backend>) -> Arc<ServerContext> {
    Arc::new(ServerContext::new(backend))
}

pub async fn seeded_context() -> Arc<ServerContext> { context_for(seeded_backend().await) }

pub async fn seeded_dispatcher() -> Dispatcher { Dispatcher::new(seeded_context().await) }

/// Wraps a backend, optionally delaying every call and failing chosen
/// operations with a store error.
///
/// ```rust
/// use std::time::Duration;
///
/// use portolan_testing::{FaultyBackend, backend::memory_backend};
///
/// let backend = FaultyBackend::new(memory_backend())
///     .with_delay(Duration::from_millis(50))
///     .failing(&["lookup_underlay"]);
/// assert_eq!(backend.calls(), 0);
/// ```
pub struct FaultyBackend {
    inner: Arc<dyn Backend>,
    delay: Duration,
    failing: HashSet<&'static str>,
    fail_all: bool,
    calls: AtomicUsize,
}

impl FaultyBackend {
    #[must_use]
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            delay: Duration::ZERO,
            failing: HashSet::new(),
            fail_all: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep `delay` before every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the named operations, e.g. `"lookup_overlay_mac"`.
    #[must_use]
    pub fn failing(mut self, ops: &[&'static str]) -> Self {
        self.failing.extend(ops);
        self
    }

    /// Fail every operation.
    #[must_use]
    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Number of calls made so far, failed ones included.
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    async fn enter(&self, op: &'static str) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_all || self.failing.contains(op) {
            return Err(BackendError::Store(format!("injected failure in {op}")));
        }
        Ok(())
    }
}

macro_rules! forward {
    ($(fn $name:ident(&self $(, $arg:ident : $ty:ty)*) -> $ret:ty;)*) => {
        #[async_trait]
        impl Backend for FaultyBackend {
            $(
                async fn $name(&self $(, $arg: $ty)*) -> Result<$ret, BackendError> {
                    self.enter(stringify!($name)).await?;
                    self.inner.$name($($arg),*).await
                }
            )*
        }
    };
}

forward! {
    fn lookup_overlay_mac(&self, mac: MacAddress, vnet_id: u32) -> Option<OverlayMapping>;
    fn lookup_overlay_ip(&self, ip: IpAddr, vnet_id: u32) -> Option<OverlayMapping>;
    fn lookup_underlay(&self, cn_id: Uuid) -> Option<UnderlayMapping>;
    fn lookup_underlay_by_ip(&self, ip: IpAddr) -> Option<UnderlayMapping>;
    fn lookup_route(&self, query: RouteQuery) -> Option<RouteMapping>;
    fn fetch_log(&self, cn_id: Uuid, max_entries: usize) -> Vec<LogEntry>;
    fn remove_log(&self, ids: &[Uuid]) -> Vec<LogRemoval>;
    fn append_log(&self, cn_id: Uuid, entry: LogEntry) -> ();
    fn add_overlay(&self, mapping: OverlayMapping) -> ();
    fn update_overlay(&self, mac: MacAddress, vnet_id: u32, update: OverlayUpdate) -> OverlayMapping;
    fn remove_overlay(&self, mac: MacAddress, vnet_id: u32) -> ();
    fn add_underlay(&self, mapping: UnderlayMapping) -> ();
    fn update_underlay(&self, cn_id: Uuid, update: UnderlayUpdate) -> UnderlayMapping;
    fn remove_underlay(&self, cn_id: Uuid) -> ();
    fn add_route(&self, route: RouteMapping) -> ();
    fn remove_route(&self, id: Uuid) -> ();
}
