use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Failure of a backend operation.
///
/// A missing mapping on lookup is not an error; lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value could not be converted to or from its record type.
    #[error("malformed record: {0}")]
    Record(#[from] serde_json::Error),

    /// The record being added already exists.
    #[error("{0} already exists")]
    Conflict(String),

    /// The record being updated or removed does not exist.
    #[error("{0} not found")]
    Missing(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote lookup service failed.
    #[error("remote lookup failed: {0}")]
    Remote(String),

    /// The underlying store reported a failure.
    #[error("store error: {0}")]
    Store(String),
}

impl BackendError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "backend_io",
            Self::Json { .. } | Self::Record(_) => "backend_data",
            Self::Conflict(_) => "backend_conflict",
            Self::Missing(_) => "backend_missing",
            Self::Timeout(_) => "backend_timeout",
            Self::Remote(_) => "backend_remote",
            Self::Store(_) => "backend_store",
        }
    }
}
