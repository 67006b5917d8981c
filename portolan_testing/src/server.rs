//! Real TCP server on a loopback port.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use portolan::{
    PortolanClient,
    ServerContext,
    SvpCodec,
    server::{PortolanServer, ServerError},
};
use tokio::{sync::oneshot, task::JoinHandle};

/// A running server that stops when [`TestServer::stop`] is awaited.
pub struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Bind `127.0.0.1:0` and serve `ctx` with two workers.
    ///
    /// Returns once the server signals it is accepting.
    ///
    /// # Panics
    ///
    /// Panics if binding or the readiness signal fails.
    pub async fn spawn(ctx: Arc<ServerContext>) -> Self {
        Self::spawn_with_codec(ctx, SvpCodec::default()).await
    }

    /// As [`TestServer::spawn`], with a custom codec.
    ///
    /// # Panics
    ///
    /// Panics if binding or the readiness signal fails.
    pub async fn spawn_with_codec(ctx: Arc<ServerContext>, codec: SvpCodec) -> Self {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = PortolanServer::new(ctx)
            .workers(2)
            .codec(codec)
            .ready_signal(ready_tx)
            .bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
            .expect("bind loopback listener");
        let addr = server.local_addr().expect("bound address");
        let handle = tokio::spawn(server.run_with_shutdown(async {
            let _ = stop_rx.await;
        }));
        ready_rx.await.expect("server ready");
        Self {
            addr,
            stop: Some(stop_tx),
            handle,
        }
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Connect a client with a one second call timeout.
    ///
    /// # Panics
    ///
    /// Panics if the connection is refused.
    pub async fn client(&self) -> PortolanClient {
        PortolanClient::connect(self.addr, Duration::from_secs(1))
            .await
            .expect("connect to test server")
    }

    /// Signal shutdown and wait for the server to finish.
    ///
    /// # Panics
    ///
    /// Panics if the server task panicked or returned an error.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.handle)
            .await
            .expect("server task")
            .expect("server run");
    }
}
