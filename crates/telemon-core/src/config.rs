//! Centralized Configuration
//!
//! Serde structures describing one telemon engine: its own listener and
//! identity, the configured protocol peers with their tracked variables and
//! plots, and the request/reply hardware devices with their poll lists.
//! Loading and layering (files, environment, command line) is left to the
//! binary; this module only defines the shape, defaults and validation.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::history::{HistoryLimits, DEFAULT_HISTORY_CAP, DEFAULT_HISTORY_KEEP};

/// Upper bound accepted for the persistence interval, in seconds
pub const MAX_STATUS_INTERVAL_SECS: f64 = 3600.0;

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of one engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Name announced during the identity handshake
    pub name: String,
    /// Address the protocol listener binds to
    pub bind_address: String,
    /// Port of the protocol listener
    pub port: u16,
    /// Accept inbound peer connections
    pub server: bool,
    /// Seconds between persisted status snapshots
    pub db_status_interval: f64,
    /// Device queue tick period in milliseconds
    pub queue_tick_ms: u64,
    /// Period of `get_status` requests to identified peers, in milliseconds
    pub peer_poll_interval_ms: u64,
    /// Delay before redialing a lost outbound link, in milliseconds
    pub reconnect_interval_ms: u64,
    /// Peers with this role do not trigger keyword broadcasts
    pub producer_role: String,
    /// Role receiving `set_keywords` broadcasts
    pub keyword_role: String,
    /// Samples kept per history series before truncation
    pub history_cap: usize,
    /// Samples left after truncating a full series
    pub history_keep: usize,
    /// JSON-lines file receiving status snapshots and log records
    pub status_log: Option<String>,
    /// Protocol peers, in display order
    pub peers: IndexMap<String, PeerConfig>,
    /// Request/reply hardware devices
    pub devices: IndexMap<String, DeviceConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            name: "monitor".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 7100,
            server: false,
            db_status_interval: 60.0,
            queue_tick_ms: 10,
            peer_poll_interval_ms: 1000,
            reconnect_interval_ms: 5000,
            producer_role: "ccd".to_string(),
            keyword_role: "ccd".to_string(),
            history_cap: DEFAULT_HISTORY_CAP,
            history_keep: DEFAULT_HISTORY_KEEP,
            status_log: None,
            peers: IndexMap::new(),
            devices: IndexMap::new(),
        }
    }
}

impl MonitorConfig {
    pub fn queue_tick(&self) -> Duration {
        Duration::from_millis(self.queue_tick_ms)
    }

    pub fn peer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.peer_poll_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs_f64(self.db_status_interval.max(0.0))
    }

    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            cap: self.history_cap,
            keep: self.history_keep,
        }
    }

    /// Enabled peers, in configuration order
    pub fn enabled_peers(&self) -> impl Iterator<Item = (&String, &PeerConfig)> {
        self.peers.iter().filter(|(_, peer)| peer.enabled)
    }

    /// Names shown in the aggregated status: enabled peers, then devices
    pub fn monitored_names(&self) -> Vec<&str> {
        self.enabled_peers()
            .map(|(name, _)| name.as_str())
            .chain(self.devices.keys().map(String::as_str))
            .collect()
    }

    pub fn is_monitored(&self, name: &str) -> bool {
        self.peers.get(name).is_some_and(|peer| peer.enabled) || self.devices.contains_key(name)
    }

    /// Register or update a peer from a `name=host:port` argument
    pub fn upsert_peer(&mut self, name: &str, host: &str, port: u16) {
        let peer = self.peers.entry(name.to_string()).or_insert_with(|| PeerConfig {
            description: Some(name.to_string()),
            ..PeerConfig::default()
        });
        peer.host = host.to_string();
        peer.port = port;
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "Engine name must be a single non-empty word, got '{}'",
                self.name
            )));
        }

        validate_interval(self.db_status_interval)?;

        if self.queue_tick_ms == 0 {
            return Err(ConfigError::Validation(
                "Queue tick must be greater than 0".to_string(),
            ));
        }
        if self.peer_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "Peer poll interval must be greater than 0".to_string(),
            ));
        }

        self.history_limits().validate()?;

        for (name, peer) in &self.peers {
            validate_name(name)?;
            peer.validate(name)?;
        }

        for (name, device) in &self.devices {
            validate_name(name)?;
            if self.peers.contains_key(name) {
                return Err(ConfigError::Validation(format!(
                    "'{name}' is configured both as a peer and as a device"
                )));
            }
            device.validate(name)?;
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Peer Configuration
// ----------------------------------------------------------------------------

/// One protocol peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Disabled peers are neither dialed nor monitored
    pub enabled: bool,
    pub host: String,
    /// Port to dial; 0 means the peer connects to us
    pub port: u16,
    pub description: Option<String>,
    /// Variables recorded into history besides those named by plots
    pub track: Vec<String>,
    /// Plots rendered from this peer's history
    pub plots: IndexMap<String, PlotConfig>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 0,
            description: None,
            track: Vec::new(),
            plots: IndexMap::new(),
        }
    }
}

impl PeerConfig {
    /// Whether the engine should dial this peer
    pub fn dials(&self) -> bool {
        self.enabled && self.port != 0
    }

    /// Unique tracked variables: explicit `track` entries, then plot values
    pub fn tracked_variables(&self) -> Vec<String> {
        let mut variables: Vec<String> = Vec::new();
        let plot_values = self.plots.values().flat_map(|plot| plot.values.iter());
        for variable in self.track.iter().chain(plot_values) {
            if !variables.contains(variable) {
                variables.push(variable.clone());
            }
        }
        variables
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        for (plot_name, plot) in &self.plots {
            if plot.values.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Plot '{plot_name}' of '{name}' lists no values"
                )));
            }
            if plot.width > 2048 || plot.height > 2048 {
                return Err(ConfigError::Validation(format!(
                    "Plot '{plot_name}' of '{name}' exceeds 2048 pixels"
                )));
            }
        }
        Ok(())
    }
}

/// One plot over a peer's history; the first value is the x axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub name: Option<String>,
    pub values: Vec<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub width: u32,
    pub height: u32,
    pub xscale: String,
    pub yscale: String,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            name: None,
            values: Vec::new(),
            xlabel: None,
            ylabel: None,
            width: 800,
            height: 300,
            xscale: "linear".to_string(),
            yscale: "linear".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Device Configuration
// ----------------------------------------------------------------------------

/// One request/reply hardware device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    /// Role reported for the device link
    pub role: String,
    /// Status queries issued whenever the queue runs dry, in order
    pub poll: Vec<PollCommand>,
    /// Lines written once right after the link comes up
    pub init: Vec<String>,
    /// Milliseconds to wait for a reply before dropping the query
    pub reply_timeout_ms: Option<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            role: "hw".to_string(),
            poll: Vec::new(),
            init: Vec::new(),
            reply_timeout_ms: Some(2000),
        }
    }
}

impl DeviceConfig {
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_commands(&self) -> Vec<String> {
        self.poll.iter().map(|p| p.command.clone()).collect()
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation(format!(
                "Device '{name}' needs a port to dial"
            )));
        }
        for poll in &self.poll {
            if poll.command.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Device '{name}' has an empty poll command"
                )));
            }
        }
        Ok(())
    }
}

/// A status query and the status field its reply fills
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCommand {
    pub command: String,
    /// Status field name; defaults to the command without its trailing `?`
    #[serde(default)]
    pub key: Option<String>,
}

impl PollCommand {
    pub fn new(command: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            key: Some(key.into()),
        }
    }

    pub fn status_key(&self) -> String {
        match &self.key {
            Some(key) => key.clone(),
            None => self
                .command
                .trim()
                .trim_start_matches(':')
                .trim_end_matches('?')
                .to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Validation Helpers
// ----------------------------------------------------------------------------

/// Parse and range-check a persistence interval in seconds
pub fn parse_interval(raw: &str) -> Result<f64, crate::CoreError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| validate_interval(*value).is_ok())
        .ok_or_else(|| crate::CoreError::InvalidInterval {
            value: raw.to_string(),
            max: MAX_STATUS_INTERVAL_SECS,
        })
}

fn validate_interval(value: f64) -> Result<(), ConfigError> {
    if !(0.0..=MAX_STATUS_INTERVAL_SECS).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "Status interval must be within 0..={MAX_STATUS_INTERVAL_SECS} seconds, got {value}"
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains('.') || name.chars().any(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "Invalid peer name '{name}': must be non-empty without dots or whitespace"
        )));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 7100);
        assert_eq!(config.name, "monitor");
        assert_eq!(config.queue_tick(), Duration::from_millis(10));
    }

    #[test]
    fn test_tracked_variables_are_unique_and_ordered() {
        let mut peer = PeerConfig {
            track: vec!["time".into(), "temp".into()],
            ..PeerConfig::default()
        };
        peer.plots.insert(
            "temperature".into(),
            PlotConfig {
                values: vec!["time".into(), "temp".into(), "pressure".into()],
                ..PlotConfig::default()
            },
        );

        assert_eq!(peer.tracked_variables(), ["time", "temp", "pressure"]);
    }

    #[test]
    fn test_interval_bounds() {
        assert_eq!(parse_interval("30").unwrap(), 30.0);
        assert_eq!(parse_interval(" 0 ").unwrap(), 0.0);
        assert!(parse_interval("3601").is_err());
        assert!(parse_interval("-1").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_rejects_duplicate_peer_and_device() {
        let mut config = MonitorConfig::default();
        config.upsert_peer("hw", "localhost", 9000);
        config.devices.insert(
            "hw".into(),
            DeviceConfig {
                port: 9221,
                ..DeviceConfig::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_dotted_names() {
        let mut config = MonitorConfig::default();
        config.upsert_peer("ccd.1", "localhost", 9000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_key_defaults_to_command_name() {
        let poll = PollCommand {
            command: "V1O?".into(),
            key: None,
        };
        assert_eq!(poll.status_key(), "V1O");
        assert_eq!(PollCommand::new("V1?", "Voltage").status_key(), "Voltage");
    }

    #[test]
    fn test_monitored_names_skip_disabled_peers() {
        let mut config = MonitorConfig::default();
        config.upsert_peer("ccd1", "localhost", 7001);
        config.upsert_peer("dome", "localhost", 7002);
        config.peers["dome"].enabled = false;
        config.devices.insert("hw".into(), DeviceConfig::default());

        assert_eq!(config.monitored_names(), ["ccd1", "hw"]);
        assert!(!config.is_monitored("dome"));
    }

    #[test]
    fn test_upsert_keeps_existing_settings() {
        let mut config = MonitorConfig::default();
        config.peers.insert(
            "ccd1".into(),
            PeerConfig {
                track: vec!["temp".into()],
                ..PeerConfig::default()
            },
        );
        config.upsert_peer("ccd1", "10.0.0.5", 7001);

        let peer = &config.peers["ccd1"];
        assert_eq!(peer.host, "10.0.0.5");
        assert_eq!(peer.port, 7001);
        assert_eq!(peer.track, ["temp"]);
    }
}
