//! Typed requests
//!
//! Converts a parsed [`Command`] into the closed set of requests the engine
//! dispatches on. Names outside the set become [`Request::Unknown`] so the
//! dispatcher stays exhaustive while unknown commands remain harmless.

use crate::protocol::Command;
use crate::status::StatusMap;
use crate::types::LogKind;

/// A request carried by one protocol line
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Identity announcement (`id name=<name> role=<role>`)
    Id {
        name: Option<String>,
        role: Option<String>,
    },
    /// Ask for our own identity
    GetId,
    /// Full status snapshot of the sender
    Status(StatusMap),
    /// Ask for the aggregated status, optionally as JSON
    GetStatus { json: bool },
    /// Relay `payload` to the connection called `target`
    Send { target: String, payload: String },
    /// Clear all history series
    ResetPlots,
    /// Forward a log message
    Log { kind: LogKind, message: String },
    /// Change engine settings (`set interval=<seconds>`)
    Set { interval: Option<String> },
    /// Relay `payload` to every identified peer
    Broadcast { payload: String },
    /// Stop the engine (console and web only)
    Exit,
    /// List live connections (console only)
    Connections,
    /// List configured peers (console only)
    Clients,
    /// Anything else, including `send` without a target
    Unknown(String),
}

impl Request {
    /// Classify a command; `None` for blank or malformed lines
    pub fn from_command(cmd: &Command) -> Option<Self> {
        let name = cmd.name()?;

        let request = match name {
            "id" => Request::Id {
                name: cmd.get("name").map(str::to_string),
                // Older peers announce themselves with `type=`
                role: cmd.get("role").or_else(|| cmd.get("type")).map(str::to_string),
            },
            "get_id" => Request::GetId,
            "status" => Request::Status(cmd.kwargs().clone()),
            "get_status" => Request::GetStatus {
                json: cmd.get("format") == Some("json"),
            },
            "send" => match cmd.chunk(1) {
                Some(target) if !target.is_empty() => Request::Send {
                    target: target.to_string(),
                    payload: cmd.raw_rest(2),
                },
                _ => Request::Unknown(name.to_string()),
            },
            "reset_plots" => Request::ResetPlots,
            "set" => Request::Set {
                interval: cmd.get("interval").map(str::to_string),
            },
            "broadcast" | "send_all" => Request::Broadcast {
                payload: cmd.raw_rest(1),
            },
            "exit" => Request::Exit,
            "connections" => Request::Connections,
            "clients" => Request::Clients,
            other => match other.parse::<LogKind>() {
                Ok(kind) => Request::Log {
                    kind,
                    message: cmd.rest(1),
                },
                Err(_) => Request::Unknown(other.to_string()),
            },
        };

        Some(request)
    }

    /// Parse and classify a raw line in one step
    pub fn parse(line: &str) -> Option<Self> {
        Self::from_command(&Command::parse(line))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
