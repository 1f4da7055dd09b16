//! telemon CLI Configuration Loading
//!
//! Layers the engine configuration with figment, lowest priority first:
//! built-in defaults, the configuration file (`telemon.toml` in the working
//! directory, or the `--config` path), `TELEMON_*` environment variables,
//! command-line flags, and finally the positional `name=host:port` peers.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use telemon_core::{ConfigError, MonitorConfig};
use tracing::info;

use crate::cli::Cli;

/// Configuration file read from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "telemon.toml";

/// Prefix of environment variable overrides, e.g. `TELEMON_PORT=7200`
pub const ENV_PREFIX: &str = "TELEMON_";

/// Build the layered figment for `cli` without extracting it
pub fn figment(cli: &Cli) -> Result<Figment, ConfigError> {
    let file = match &cli.config {
        Some(path) => {
            if !Path::new(path).is_file() {
                return Err(ConfigError::FileSystem(format!(
                    "Configuration file not found: {path}"
                )));
            }
            info!("Loading configuration from: {}", path);
            path.as_str()
        }
        None => DEFAULT_CONFIG_FILE,
    };

    let mut figment = Figment::new()
        .merge(Serialized::defaults(MonitorConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(port) = cli.port {
        figment = figment.merge(("port", port));
    }
    if let Some(name) = &cli.name {
        figment = figment.merge(("name", name));
    }
    if let Some(interval) = cli.interval {
        figment = figment.merge(("db_status_interval", interval));
    }
    if cli.server {
        figment = figment.merge(("server", true));
    }
    if let Some(path) = &cli.status_log {
        figment = figment.merge(("status_log", path));
    }

    Ok(figment)
}

/// Load, complete and validate the engine configuration
pub fn load_configuration(cli: &Cli) -> Result<MonitorConfig, ConfigError> {
    let mut config: MonitorConfig = figment(cli)?
        .extract()
        .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {e}")))?;

    for peer in &cli.peers {
        config.upsert_peer(&peer.name, &peer.host, peer.port);
    }

    config.validate()?;
    Ok(config)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
