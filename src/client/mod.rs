//! Client side of the lookup protocol.
//!
//! [`PortolanClient`] speaks the same framing and message codec as the
//! server over any byte stream. It is used by the route handler to resolve
//! destinations held by a peer data center, and by tests and tooling to
//! drive a server.

mod error;
mod messaging;
mod runtime;

pub use error::ClientError;
pub use runtime::{ClientStream, DEFAULT_TIMEOUT, PortolanClient};
