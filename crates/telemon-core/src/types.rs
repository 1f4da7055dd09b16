//! Shared identifier and log types

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

// ----------------------------------------------------------------------------
// Connection Identifier
// ----------------------------------------------------------------------------

/// Identifier of one network link, unique for the lifetime of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The identifier following this one
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Log Forwarding
// ----------------------------------------------------------------------------

/// Kind of a forwarded log message, as named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Debug,
    Info,
    Message,
    Error,
    Warning,
    Success,
}

impl LogKind {
    pub const ALL: [LogKind; 6] = [
        LogKind::Debug,
        LogKind::Info,
        LogKind::Message,
        LogKind::Error,
        LogKind::Warning,
        LogKind::Success,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Debug => "debug",
            LogKind::Info => "info",
            LogKind::Message => "message",
            LogKind::Error => "error",
            LogKind::Warning => "warning",
            LogKind::Success => "success",
        }
    }

    /// Tracing level a forwarded message of this kind is emitted at
    pub fn level(self) -> tracing::Level {
        match self {
            LogKind::Debug => tracing::Level::DEBUG,
            LogKind::Error => tracing::Level::ERROR,
            LogKind::Warning => tracing::Level::WARN,
            LogKind::Info | LogKind::Message | LogKind::Success => tracing::Level::INFO,
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownLogKind(s.to_string()))
    }
}

/// One log event as handed to sinks and log subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "msg")]
    pub message: String,
    pub time: DateTime<Utc>,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

impl LogRecord {
    pub fn new(
        message: impl Into<String>,
        time: DateTime<Utc>,
        source: impl Into<String>,
        kind: LogKind,
    ) -> Self {
        Self {
            message: message.into(),
            time,
            source: source.into(),
            kind,
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} > {} > {}",
            self.time.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.source,
            self.kind,
            self.message
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_kind_round_trips_wire_names() {
        for kind in LogKind::ALL {
            assert_eq!(kind.as_str().parse::<LogKind>().unwrap(), kind);
        }
        assert!("verbose".parse::<LogKind>().is_err());
    }

    #[test]
    fn test_log_record_json_uses_web_field_names() {
        let time = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = LogRecord::new("ccd1 connected", time, "monitor", LogKind::Info);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["msg"], "ccd1 connected");
        assert_eq!(json["type"], "info");
        assert_eq!(json["source"], "monitor");
    }

    #[test]
    fn test_connection_id_ordering() {
        let first = ConnectionId::new(1);
        assert!(first < first.next());
        assert_eq!(first.next().to_string(), "#2");
    }
}
