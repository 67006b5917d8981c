//! Reporting panics caught in connection tasks.

use std::{any::Any, fmt, net::SocketAddr};

/// Text carried by a panic payload, or a placeholder for payloads that are
/// neither `String` nor `&'static str`.
///
/// ```
/// use portolan::panic::payload_message;
/// assert_eq!(payload_message(&"boom"), "boom");
/// assert_eq!(payload_message(&String::from("boom")), "boom");
/// assert_eq!(payload_message(&5_u32), "<non-string panic payload>");
/// ```
#[must_use]
pub fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

/// A caught connection-task panic together with the peer it was serving.
#[derive(Debug)]
pub struct TaskPanic {
    payload: Box<dyn Any + Send>,
    peer_addr: Option<SocketAddr>,
}

impl TaskPanic {
    #[must_use]
    pub fn new(payload: Box<dyn Any + Send>, peer_addr: Option<SocketAddr>) -> Self {
        Self { payload, peer_addr }
    }

    /// The panic text.
    #[must_use]
    pub fn message(&self) -> &str { payload_message(self.payload.as_ref()) }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }
}

impl fmt::Display for TaskPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connection task panicked: panic={}, peer_addr={:?}",
            self.message(),
            self.peer_addr
        )
    }
}
