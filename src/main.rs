//! `portolan` server binary.
//!
//! Loads the configuration, applies CLI overrides, opens the backend and
//! serves until Ctrl+C.

mod cli;

use std::sync::Arc;

use clap::Parser;
use portolan::{
    config::{Config, ConfigError},
    error::{PortolanError, Result},
    server::PortolanServer,
};

fn load_config(cli: cli::Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &Config) -> Result<()> {
    let level: tracing::Level = config
        .log_level
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("unknown log level {}", config.log_level)))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .map_err(|e| PortolanError::Setup {
            what: "logging",
            reason: e.to_string(),
        })
}

#[cfg(feature = "metrics")]
fn init_metrics(config: &Config) -> Result<()> {
    if let Some(addr) = config.metrics_addr {
        portolan::metrics::install_prometheus(addr).map_err(|e| PortolanError::Setup {
            what: "metrics exporter",
            reason: e.to_string(),
        })?;
        tracing::info!(%addr, "serving metrics");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn init_metrics(config: &Config) -> Result<()> {
    if config.metrics_addr.is_some() {
        tracing::warn!("metrics_addr ignored: built without the metrics feature");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(cli::Cli::parse())?;
    init_logging(&config)?;
    init_metrics(&config)?;

    let backend = config.open_backend().await?;
    let ctx = Arc::new(config.build_context(backend));
    PortolanServer::new(ctx)
        .workers(config.worker_count())
        .codec(config.codec())
        .bind(config.listen_addr())?
        .run()
        .await?;
    Ok(())
}
