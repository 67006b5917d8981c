//! Connection tasks spawned by the accept loop.

use std::net::SocketAddr;

use futures::FutureExt;
use log::error;
use tokio::net::TcpStream;

use super::runtime::AcceptLoopOptions;
use crate::{connection::Connection, metrics, panic::TaskPanic};

/// Decrements the active-connection gauge however the task ends.
struct ConnectionGuard;

impl ConnectionGuard {
    fn new() -> Self {
        metrics::inc_connections();
        Self
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) { metrics::dec_connections(); }
}

/// Spawn a task serving `stream`, logging and discarding any panic.
pub(super) fn spawn_connection_task(
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    options: &AcceptLoopOptions,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, ?peer_addr, "failed to set TCP_NODELAY");
    }
    let connection = Connection::new(
        stream,
        options.codec,
        options.dispatcher.clone(),
        options.shutdown.child_token(),
    )
    .with_peer_addr(peer_addr);

    options.tracker.spawn(async move {
        let _guard = ConnectionGuard::new();
        let fut = std::panic::AssertUnwindSafe(connection.run()).catch_unwind();

        match fut.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(error = %err, ?peer_addr, "connection closed with error");
            }
            Err(panic) => {
                metrics::inc_errors("panic");
                let report = TaskPanic::new(panic, peer_addr);
                // Emit via both `log` and `tracing` for tests that capture either.
                error!("{report}");
                tracing::error!(panic = report.message(), ?peer_addr, "connection task panicked");
            }
        }
    });
}
