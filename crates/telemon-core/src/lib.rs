//! telemon Core
//!
//! Synchronous building blocks for the telemon telemetry relay. Nothing in
//! this crate performs I/O or reads a clock; callers pass instants in, which
//! keeps every type here deterministic under test.
//!
//! - [`protocol`]: line parsing ([`Command`]) and the closed [`Request`] set
//! - [`queue`]: the request/reply correlation queue for hardware links
//! - [`history`]: bounded per-variable sample series
//! - [`status`]: the aggregated [`GlobalStatus`] view
//! - [`config`]: serde configuration types shared by runtime and CLI

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod history;
pub mod protocol;
pub mod queue;
pub mod status;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ConfigError, DeviceConfig, MonitorConfig, PeerConfig, PlotConfig, PollCommand};
pub use history::{HistoryLimits, HistoryStore, Sample, SampleValue, TIME_VARIABLE};
pub use protocol::{Command, Request};
pub use queue::{OutboundQueue, QueueEntry, Source, TickAction};
pub use status::{GlobalStatus, StatusMap};
pub use types::{ConnectionId, LogKind, LogRecord};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Core error types for telemon
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid interval '{value}': expected seconds between 0 and {max}")]
    InvalidInterval { value: String, max: f64 },

    #[error("Unknown log kind: {0}")]
    UnknownLogKind(String),
}

pub type Result<T> = core::result::Result<T, CoreError>;
