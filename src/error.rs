//! Top-level error type for the `portolan` binary.
//!
//! Library modules return their own focused errors; `PortolanError` gathers
//! the ones that can end the process.

use thiserror::Error;

use crate::{config::ConfigError, server::ServerError};

#[derive(Debug, Error)]
pub enum PortolanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    /// Installing the log subscriber or metrics exporter failed.
    #[error("failed to initialise {what}: {reason}")]
    Setup { what: &'static str, reason: String },
}

/// Result alias used by the binary entry point.
pub type Result<T> = std::result::Result<T, PortolanError>;
