//! Command line interface for the `portolan` binary.
//!
//! Flags given here override the matching fields of the configuration file.

use std::path::PathBuf;

use clap::Parser;

/// Command line arguments for the `portolan` binary.
#[derive(Debug, Parser)]
#[command(
    name = "portolan",
    version,
    about = "Answers overlay-to-underlay lookups for virtual network agents"
)]
pub struct Cli {
    /// JSON configuration file. Built-in defaults are used when omitted.
    #[arg(short = 'f', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// TCP port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum log level, e.g. `debug`.
    #[arg(short, long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "portolan",
            "--config",
            "/etc/portolan.json",
            "-p",
            "2020",
            "--log-level",
            "debug",
        ]);
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/etc/portolan.json"))
        );
        assert_eq!(cli.port, Some(2020));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn everything_is_optional() {
        let cli = Cli::parse_from(["portolan"]);
        assert!(cli.config.is_none() && cli.port.is_none() && cli.log_level.is_none());
    }
}
