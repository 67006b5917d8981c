#![doc(html_root_url = "https://docs.rs/portolan/latest")]
//! Public API for the `portolan` library.
//!
//! Portolan answers lookups from virtual network agents over the SVP binary
//! protocol: which compute node, and at which underlay address, hosts a
//! given overlay MAC or IP, plus change logs and cross-network routes.
//!
//! The crate is layered bottom-up: [`protocol`] constants and addresses,
//! [`frame`] and [`codec`] for framing, [`message`] for payload layouts,
//! [`backend`] for mapping storage, [`dispatch`] for request handling and
//! [`connection`]/[`server`] for the TCP plumbing. [`client`] speaks the
//! same protocol from the agent side.

pub mod backend;
pub mod checksum;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod protocol;
pub mod server;

#[cfg(test)]
mod test_helpers;

pub use client::PortolanClient;
pub use codec::{CodecError, SvpCodec};
pub use dispatch::{Dispatcher, ServerContext};
pub use frame::Frame;
pub use message::{Envelope, Message};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_TOTAL, RESPONSES_TOTAL};
pub use server::PortolanServer;
