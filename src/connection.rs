//! Per-connection request pipeline.
//!
//! Each connection owns its framing buffer and carries one frame at a time
//! through decode, dispatch and encode before reading the next. Responses
//! therefore leave in exactly the order their requests arrived, and a slow
//! handler delays every later request on the same connection.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::Instrument;

use crate::{
    codec::{CodecError, EofError, SvpCodec},
    dispatch::Dispatcher,
    frame::Frame,
    message::{decode, encode},
    metrics::{self, Direction},
};

/// Drives one connection until the peer closes it or shutdown is requested.
pub struct Connection<T> {
    framed: Framed<T, SvpCodec>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    peer_addr: Option<SocketAddr>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    #[must_use]
    pub fn new(
        stream: T,
        codec: SvpCodec,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            framed: Framed::new(stream, codec),
            dispatcher,
            shutdown,
            peer_addr: None,
        }
    }

    /// Record the remote address for log context.
    #[must_use]
    pub fn with_peer_addr(mut self, peer_addr: Option<SocketAddr>) -> Self {
        self.peer_addr = peer_addr;
        self
    }

    /// Serve requests until the stream ends.
    ///
    /// Cancelling the shutdown token abandons any request still in flight;
    /// its response is never written.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the connection, or
    /// [`CodecError::Eof`] if the peer closed mid-frame. A clean close is
    /// `Ok(())`.
    pub async fn run(mut self) -> Result<(), CodecError> {
        let span = tracing::info_span!("connection", peer_addr = ?self.peer_addr);
        async move {
            while let Some(frame) = self.next_frame().await? {
                if !self.process(frame).await? {
                    break;
                }
            }
            tracing::debug!("connection finished");
            Ok::<(), CodecError>(())
        }
        .instrument(span)
        .await
    }

    /// Read the next frame, or `None` on close or shutdown.
    async fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        let next = tokio::select! {
            biased;

            () = self.shutdown.cancelled() => return Ok(None),
            next = self.framed.next() => next,
        };
        match next {
            None => Ok(None),
            Some(Ok(frame)) => {
                metrics::inc_frames(Direction::Inbound);
                Ok(Some(frame))
            }
            Some(Err(err)) => {
                let err = CodecError::from_io(err);
                if err.is_clean_close() {
                    return Ok(None);
                }
                metrics::inc_errors(err.error_type());
                if let CodecError::Eof(EofError::MidFrame { .. } | EofError::MidHeader { .. }) =
                    &err
                {
                    tracing::info!(error = %err, "peer closed mid-frame");
                } else {
                    tracing::warn!(error = %err, "connection read failed");
                }
                Err(err)
            }
        }
    }

    /// Handle one frame. Returns `false` if shutdown interrupted it.
    async fn process(&mut self, frame: Frame) -> Result<bool, CodecError> {
        let request = match decode(&frame) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(
                    request_id = frame.request_id(),
                    error = %err,
                    "dropping undecodable frame"
                );
                metrics::inc_errors("decode");
                return Ok(true);
            }
        };
        tracing::trace!(
            request_id = request.request_id,
            opcode = %request.opcode(),
            "request received"
        );

        let response = tokio::select! {
            biased;

            () = self.shutdown.cancelled() => return Ok(false),
            response = self.dispatcher.dispatch(&request) => response,
        };
        let Some(response) = response else {
            return Ok(true);
        };

        let frame = match encode(&response) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(
                    request_id = response.request_id,
                    opcode = %response.opcode(),
                    error = %err,
                    "failed to encode response"
                );
                metrics::inc_errors("encode");
                return Ok(true);
            }
        };
        let max = self.framed.codec().max_payload_size();
        if frame.payload.len() > max {
            tracing::error!(
                request_id = response.request_id,
                opcode = %response.opcode(),
                size = frame.payload.len(),
                max,
                "response exceeds the payload limit"
            );
            metrics::inc_errors("encode");
            return Ok(true);
        }
        self.framed.send(frame).await.map_err(CodecError::from_io)?;
        metrics::inc_frames(Direction::Outbound);
        if let Some(status) = response.message.status() {
            metrics::inc_responses(status);
        }
        Ok(true)
    }
}

/// Serve `stream` with the given dispatcher until it closes.
///
/// # Errors
///
/// See [`Connection::run`].
pub async fn serve_connection<T>(
    stream: T,
    codec: SvpCodec,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
) -> Result<(), CodecError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    Connection::new(stream, codec, dispatcher, shutdown)
        .run()
        .await
}
