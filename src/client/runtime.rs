//! Client runtime implementation.

use std::{fmt, net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_util::codec::Framed;

use super::ClientError;
use crate::{
    codec::SvpCodec,
    message::{Envelope, Message, decode, encode},
};

/// Default bound on a single request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether `received` names a request issued before `current`.
///
/// Ids wrap, so the older half of the id space counts as earlier.
pub(super) fn answers_earlier_request(received: u32, current: u32) -> bool {
    let age = current.wrapping_sub(received);
    age != 0 && age <= u32::MAX / 2
}

/// Trait alias for stream types that can be used with the client runtime.
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T> ClientStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Request/response client for one connection.
///
/// Requests are stamped with the current protocol version and a request id
/// counting up from 1. Each call waits for its answer before returning, so
/// responses are matched both by order and by id.
///
/// ```no_run
/// use std::time::Duration;
///
/// use portolan::client::{ClientError, PortolanClient};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), ClientError> {
/// let addr = "127.0.0.1:1296".parse().expect("valid socket address");
/// let mut client = PortolanClient::connect(addr, Duration::from_secs(1)).await?;
/// client.ping().await?;
/// # Ok(())
/// # }
/// ```
pub struct PortolanClient<T = TcpStream>
where
    T: ClientStream,
{
    pub(crate) framed: Framed<T, SvpCodec>,
    pub(super) next_request_id: u32,
    timeout: Duration,
}

impl<T> fmt::Debug for PortolanClient<T>
where
    T: ClientStream,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortolanClient")
            .field("next_request_id", &self.next_request_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PortolanClient<TcpStream> {
    /// Open a TCP connection to `addr`, giving up after `timeout`.
    ///
    /// The same timeout then bounds every call.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] or [`ClientError::Io`] if the
    /// connection cannot be established.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream).with_timeout(timeout))
    }
}

impl<T> PortolanClient<T>
where
    T: ClientStream,
{
    /// Wrap an established stream using the default codec and timeout.
    #[must_use]
    pub fn new(stream: T) -> Self { Self::with_codec(stream, SvpCodec::default()) }

    #[must_use]
    pub fn with_codec(stream: T, codec: SvpCodec) -> Self {
        Self {
            framed: Framed::new(stream, codec),
            next_request_id: 1,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration { self.timeout }

    /// Return the next request id. Ids count up from 1 and skip 0 on wrap.
    pub fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Send `message` as a new request and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotARequest`] for messages that expect no
    /// answer, [`ClientError::Timeout`] if no response arrives in time,
    /// [`ClientError::CorrelationMismatch`] or
    /// [`ClientError::UnexpectedResponse`] if the response does not answer
    /// this request, and transport or codec errors otherwise.
    pub async fn call(&mut self, message: Message) -> Result<Envelope, ClientError> {
        let opcode = message.opcode();
        let expected = opcode.ack().ok_or(ClientError::NotARequest(opcode))?;
        let request_id = self.next_request_id();
        let request = Envelope::request(request_id, message);
        let timeout = self.timeout;

        let response = tokio::time::timeout(timeout, self.exchange(&request))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;

        if response.request_id != request_id {
            return Err(ClientError::CorrelationMismatch {
                expected: request_id,
                received: response.request_id,
            });
        }
        if response.opcode() != expected {
            return Err(ClientError::UnexpectedResponse {
                expected,
                received: response.opcode(),
            });
        }
        Ok(response)
    }

    /// Send a message without waiting for an answer.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        let frame = encode(envelope)?;
        self.framed.send(frame).await?;
        Ok(())
    }

    /// Wait for the next decodable message from the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] if the stream ends first.
    pub async fn receive(&mut self) -> Result<Envelope, ClientError> {
        let Some(frame) = self.framed.next().await else {
            return Err(ClientError::Disconnected);
        };
        Ok(decode(&frame?)?)
    }

    /// Send `request` and read its answer, skipping late answers to earlier
    /// requests that timed out.
    async fn exchange(&mut self, request: &Envelope) -> Result<Envelope, ClientError> {
        self.send(request).await?;
        loop {
            let response = self.receive().await?;
            if !answers_earlier_request(response.request_id, request.request_id) {
                return Ok(response);
            }
            log::debug!(
                "discarding late response to request {} while awaiting {}",
                response.request_id,
                request.request_id
            );
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T { self.framed.get_ref() }

    /// Consume the client and return the underlying stream.
    pub fn into_inner(self) -> T { self.framed.into_inner() }
}
