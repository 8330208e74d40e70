pub mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cs_domain::config::Config;

/// chatstream: a streaming chat-completion gateway with tool dispatch.
#[derive(Debug, Parser)]
#[command(name = "chatstream", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `CS_CONFIG` (or `config.toml`). A missing
/// file yields the defaults. Returns the config and the path used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("CS_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 3210);
    }

    #[test]
    fn file_overrides_are_applied() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9000\n\n[rate_limit]\nmax_requests = 3").unwrap();
        let config = load_config_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.rate_limit.window_secs, 60);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains(&path));
    }
}
