//! Tokio-based TCP server for the lookup protocol.
//!
//! `PortolanServer` spawns worker tasks that accept TCP connections and
//! serve each one with its own [`Connection`](crate::connection::Connection)
//! sharing a single [`ServerContext`].

use std::{num::NonZeroUsize, sync::Arc, thread};

use tokio::{net::TcpListener, sync::oneshot};

use crate::{codec::SvpCodec, dispatch::ServerContext};

/// Tokio-based server answering lookup requests.
///
/// The server carries a typestate `S` indicating whether it is [`Unbound`]
/// (not yet bound to a TCP listener) or [`Bound`]. New servers start
/// `Unbound` and must call [`PortolanServer::bind`] or
/// [`PortolanServer::bind_existing_listener`] before running.
pub struct PortolanServer<S = Unbound>
where
    S: ServerState,
{
    pub(crate) ctx: Arc<ServerContext>,
    pub(crate) codec: SvpCodec,
    pub(crate) workers: usize,
    /// Fired once every worker has been spawned.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) backoff_config: BackoffConfig,
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

impl PortolanServer<Unbound> {
    /// Create a server answering from `ctx`.
    ///
    /// One worker is spawned per available CPU unless overridden.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self {
            ctx,
            codec: SvpCodec::default(),
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            ready_tx: None,
            backoff_config: BackoffConfig::default(),
            state: Unbound,
        }
    }
}

impl<S> PortolanServer<S>
where
    S: ServerState,
{
    /// Set the number of accept workers. Zero is raised to one.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    #[must_use]
    pub fn worker_count(&self) -> usize { self.workers }

    /// Notify `tx` once the server has started accepting connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Override the back-off applied after failed accepts.
    #[must_use]
    pub fn accept_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff_config = config.normalized();
        self
    }

    /// Use `codec` for every connection, e.g. to change the payload cap.
    #[must_use]
    pub fn codec(mut self, codec: SvpCodec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> { &self.ctx }
}

mod binding;
mod connection;
pub mod error;
mod runtime;

pub use error::ServerError;
/// Re-exported configuration types for server backoff behavior.
pub use runtime::BackoffConfig;

#[cfg(test)]
pub(crate) mod test_util;
