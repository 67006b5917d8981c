//! Service configuration.
//!
//! [`Config`] is read from a JSON file. Every field has a default, so an
//! empty object `{}` describes a server on port 1296 answering from an
//! empty in-memory store. The loaded value is validated before use and then
//! turned into the shared [`ServerContext`] with [`Config::build_context`].

use std::{
    collections::HashMap,
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    backend::{
        Backend,
        BackendError,
        json::JsonStore,
        kv::{CacheConfig, KvBackend, MemoryKv},
    },
    codec::SvpCodec,
    dispatch::{
        DEFAULT_BACKEND_TIMEOUT,
        DEFAULT_REMOTE_ATTEMPTS,
        DEFAULT_REMOTE_TIMEOUT,
        ServerContext,
    },
    protocol::{DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_PORT},
};

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("failed to open backend: {0}")]
    Backend(#[from] BackendError),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum log level: `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Accept workers; defaults to the available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default)]
    pub backend: BackendConfig,

    /// Upper bound on each request handler.
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,

    #[serde(default)]
    pub data_center_id: u32,

    /// Portolan servers owning other data centers, keyed by data-center id.
    #[serde(default)]
    pub route_peers: HashMap<u32, SocketAddr>,

    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    #[serde(default = "default_remote_attempts")]
    pub remote_attempts: u32,

    /// Address for the Prometheus scrape endpoint. Disabled when absent.
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Mapping store selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Flat JSON files in `dir`.
    Json { dir: PathBuf },
    /// In-process key-value store behind the read cache.
    Memory {
        #[serde(default)]
        cache: CacheSettings,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory {
            cache: CacheSettings::default(),
        }
    }
}

/// Read-cache sizing for the key-value backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl From<CacheSettings> for CacheConfig {
    fn from(settings: CacheSettings) -> Self {
        CacheConfig {
            capacity: settings.capacity,
            ttl: Duration::from_millis(settings.ttl_ms),
        }
    }
}

fn default_host() -> IpAddr { IpAddr::V4(Ipv4Addr::UNSPECIFIED) }

fn default_port() -> u16 { DEFAULT_PORT }

fn default_log_level() -> String { String::from("info") }

#[expect(clippy::cast_possible_truncation, reason = "constant is a few seconds")]
fn default_backend_timeout_ms() -> u64 { DEFAULT_BACKEND_TIMEOUT.as_millis() as u64 }

fn default_max_payload_size() -> usize { DEFAULT_MAX_PAYLOAD_SIZE }

#[expect(clippy::cast_possible_truncation, reason = "constant is a few seconds")]
fn default_remote_timeout_ms() -> u64 { DEFAULT_REMOTE_TIMEOUT.as_millis() as u64 }

fn default_remote_attempts() -> u32 { DEFAULT_REMOTE_ATTEMPTS }

fn default_cache_capacity() -> usize { 100 }

fn default_cache_ttl_ms() -> u64 { 10_000 }

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            workers: None,
            backend: BackendConfig::default(),
            backend_timeout_ms: default_backend_timeout_ms(),
            max_payload_size: default_max_payload_size(),
            data_center_id: 0,
            route_peers: HashMap::new(),
            remote_timeout_ms: default_remote_timeout_ms(),
            remote_attempts: default_remote_attempts(),
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Read, parse and validate the JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`], [`ConfigError::Parse`] or
    /// [`ConfigError::Invalid`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot rule out on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(invalid("log_level must be a level name such as info"));
        }
        if self.port == 0 {
            return Err(invalid("port must be non-zero"));
        }
        if self.workers == Some(0) {
            return Err(invalid("workers must be at least 1"));
        }
        if self.backend_timeout_ms == 0 {
            return Err(invalid("backend_timeout_ms must be non-zero"));
        }
        if self.max_payload_size == 0 {
            return Err(invalid("max_payload_size must be non-zero"));
        }
        if self.max_payload_size > u32::MAX as usize {
            return Err(invalid("max_payload_size must fit in 32 bits"));
        }
        if self.remote_attempts == 0 {
            return Err(invalid("remote_attempts must be at least 1"));
        }
        if self.route_peers.contains_key(&self.data_center_id) {
            return Err(invalid(
                "route_peers must not contain the local data_center_id",
            ));
        }
        match &self.backend {
            BackendConfig::Json { dir } if dir.as_os_str().is_empty() => {
                Err(invalid("backend.dir must not be empty"))
            }
            BackendConfig::Memory { cache } if cache.capacity == 0 => {
                Err(invalid("backend.cache.capacity must be non-zero"))
            }
            _ => Ok(()),
        }
    }

    /// Socket address to listen on.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr { SocketAddr::new(self.host, self.port) }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }

    #[must_use]
    pub fn codec(&self) -> SvpCodec { SvpCodec::new(self.max_payload_size) }

    /// Open the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Backend`] if the JSON store cannot be created.
    pub async fn open_backend(&self) -> Result<Arc<dyn Backend>, ConfigError> {
        Ok(match &self.backend {
            BackendConfig::Json { dir } => Arc::new(JsonStore::open(dir.clone()).await?),
            BackendConfig::Memory { cache } => {
                Arc::new(KvBackend::new(MemoryKv::new(), CacheConfig::from(*cache)))
            }
        })
    }

    /// Assemble the shared dispatcher context around `backend`.
    #[must_use]
    pub fn build_context(&self, backend: Arc<dyn Backend>) -> ServerContext {
        let ctx = ServerContext::new(backend)
            .with_backend_timeout(Duration::from_millis(self.backend_timeout_ms))
            .with_data_center(self.data_center_id)
            .with_max_payload_size(self.max_payload_size)
            .with_remote_policy(
                Duration::from_millis(self.remote_timeout_ms),
                self.remote_attempts,
            );
        self.route_peers
            .iter()
            .fold(ctx, |ctx, (&dc_id, &addr)| ctx.with_route_peer(dc_id, addr))
    }
}

fn invalid(msg: &str) -> ConfigError { ConfigError::Invalid(msg.to_owned()) }
