//! Utilities for exercising a `portolan` server in tests.
//!
//! - [`drive`] runs a connection over an in-memory duplex stream and
//!   collects whatever the server wrote back.
//! - [`frames`] builds wire bytes directly, including malformed ones the
//!   encoder refuses to produce.
//! - [`backend`] provides a standard seeded data set and a wrapper that
//!   delays or fails backend calls.
//! - [`server`] runs a real TCP server on a loopback port.
//! - [`logging`] serialises access to the global `log` capture.
//!
//! ```rust
//! use portolan::{Envelope, Message};
//! use portolan_testing::{drive_with_envelopes, seeded_dispatcher};
//!
//! # async fn demo() -> std::io::Result<()> {
//! let replies = drive_with_envelopes(
//!     seeded_dispatcher().await,
//!     &[Envelope::request(1, Message::Ping)],
//! )
//! .await?;
//! assert_eq!(replies[0].message, Message::Pong);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod drive;
pub mod frames;
pub mod logging;
pub mod metrics;
pub mod server;

pub use backend::{FaultyBackend, seeded_backend, seeded_context, seeded_dispatcher};
pub use drive::{decode_responses, drive_with_envelopes, drive_with_frames};
pub use frames::{corrupt_checksum, raw_frame, request_wire};
pub use logging::{LoggerHandle, logger};
pub use server::TestServer;
