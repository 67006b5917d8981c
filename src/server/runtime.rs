//! Runtime control for [`PortolanServer`].

mod accept;
mod backoff;

use std::sync::Arc;

pub(super) use accept::AcceptLoopOptions;
use accept::accept_loop;
pub use backoff::BackoffConfig;
use futures::Future;
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{Bound, PortolanServer, ServerError};
use crate::dispatch::Dispatcher;

impl PortolanServer<Bound> {
    /// Run the server until Ctrl+C is received.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use portolan::{
    ///     backend::kv::{CacheConfig, KvBackend, MemoryKv},
    ///     dispatch::ServerContext,
    ///     server::PortolanServer,
    /// };
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), portolan::server::ServerError> {
    /// let backend = KvBackend::new(MemoryKv::new(), CacheConfig::default());
    /// let ctx = Arc::new(ServerContext::new(Arc::new(backend)));
    /// PortolanServer::new(ctx)
    ///     .bind(([127, 0, 0, 1], 1296).into())?
    ///     .run()
    ///     .await
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Accept failures are retried with back-off and never surface here; the
    /// `Result` is kept for callers that chain it after [`PortolanServer::bind`].
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
            }
        })
        .await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// On shutdown the accept workers stop, every open connection abandons
    /// its in-flight request, and this future resolves once all tasks have
    /// finished.
    ///
    /// # Errors
    ///
    /// See [`PortolanServer::run`].
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let PortolanServer {
            ctx,
            codec,
            workers,
            ready_tx,
            backoff_config,
            state: Bound { listener },
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let options = AcceptLoopOptions {
            dispatcher: Dispatcher::new(ctx),
            codec,
            shutdown: shutdown_token.clone(),
            tracker: tracker.clone(),
            backoff: backoff_config,
        };

        tracing::info!(
            local_addr = ?listener.local_addr().ok(),
            workers,
            "server listening"
        );
        for _ in 0..workers {
            tracker.spawn(accept_loop(Arc::clone(&listener), options.clone()));
        }

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            tracing::warn!("failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("server stopped");
        Ok(())
    }
}
