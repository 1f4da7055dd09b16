//! telemon Runtime Engine
//!
//! This crate contains the relay engine and the tasks that drive it:
//! - `Engine`: the single owner of connections, devices and history
//! - `MonitorTask`: the event loop feeding transport events, handle requests
//!   and periodic ticks into the engine
//! - Connection, device and aggregation managers
//! - The TCP transport and the persistence sinks
//!
//! `telemon-core` provides the synchronous building blocks; this crate puts
//! them on the network.

pub mod builder;
pub mod logic;
pub mod managers;
pub mod sink;
pub mod transport;

pub use builder::{RuntimeBuilder, RuntimeHandle};
pub use logic::{Control, Engine, MonitorTask, Origin, RequestHandlers};
pub use managers::*;
pub use sink::{JsonLinesSink, PersistenceSink, SinkRecord};
pub use transport::{LineReader, LinkKind, LinkSender, TransportEvent, MAX_LINE_LEN};

// Re-export core types for convenience
pub use telemon_core::{
    ConnectionId, CoreError, GlobalStatus, LogKind, LogRecord, MonitorConfig, Request, Sample,
    Source, StatusMap,
};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Runtime error types
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] telemon_core::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, RuntimeError>;
