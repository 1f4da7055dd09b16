//! Test utilities for driving the engine without sockets
//!
//! Links are plain unbounded channels, time is an explicit `Instant`, and
//! the persistence sink records everything it is handed.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use telemon_core::{
    ConnectionId, DeviceConfig, LogRecord, MonitorConfig, PeerConfig, PlotConfig, PollCommand,
};
use telemon_runtime::{Engine, LinkKind, PersistenceSink};
use tokio::sync::mpsc;

// ----------------------------------------------------------------------------
// Recording Sink
// ----------------------------------------------------------------------------

/// Persistence sink keeping every record in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    statuses: Mutex<Vec<serde_json::Value>>,
    logs: Mutex<Vec<LogRecord>>,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<serde_json::Value> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.logs.lock().unwrap().clone()
    }
}

impl PersistenceSink for RecordingSink {
    fn append_status(&self, _time: DateTime<Utc>, status: &serde_json::Value) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn append_log(&self, record: &LogRecord) {
        self.logs.lock().unwrap().push(record.clone());
    }
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Two camera peers, a weather station with a plot and a power supply
pub fn observatory_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    for name in ["ccd1", "ccd2"] {
        config.peers.insert(name.into(), PeerConfig::default());
    }

    let mut weather = PeerConfig {
        track: vec!["time".into(), "temp".into()],
        ..PeerConfig::default()
    };
    weather.plots.insert(
        "temperature".into(),
        PlotConfig {
            values: vec!["time".into(), "temp".into(), "humidity".into()],
            ..PlotConfig::default()
        },
    );
    config.peers.insert("weather".into(), weather);

    config.devices.insert(
        "hw".into(),
        DeviceConfig {
            port: 9221,
            poll: vec![
                PollCommand::new("I1O?", "I1"),
                PollCommand::new("V1O?", "V1"),
                PollCommand::new("OP1?", "OP1"),
            ],
            ..DeviceConfig::default()
        },
    );
    config
}

// ----------------------------------------------------------------------------
// Engine Harness
// ----------------------------------------------------------------------------

pub type LinkRx = mpsc::UnboundedReceiver<String>;

/// An engine plus helpers to fake links
pub struct Harness {
    pub engine: Engine,
    pub sink: Arc<RecordingSink>,
    pub start: Instant,
    next_id: u64,
}

impl Harness {
    pub fn new(config: MonitorConfig) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let engine = Engine::new(config).with_sink(sink.clone());
        Self {
            engine,
            sink,
            start: Instant::now(),
            next_id: 0,
        }
    }

    /// An engine that persists nothing
    pub fn without_sink(config: MonitorConfig) -> Self {
        Self {
            engine: Engine::new(config),
            sink: Arc::new(RecordingSink::default()),
            start: Instant::now(),
            next_id: 0,
        }
    }

    /// Open an inbound link and swallow the handshake
    pub fn connect(&mut self) -> (ConnectionId, LinkRx) {
        let (id, mut rx) = self.link(LinkKind::Inbound);
        assert_eq!(drain(&mut rx), ["id name=monitor role=monitor", "get_id"]);
        (id, rx)
    }

    /// Open an inbound link and identify it
    pub fn peer(&mut self, name: &str, role: &str) -> (ConnectionId, LinkRx) {
        let (id, rx) = self.connect();
        self.line(id, &format!("id name={name} role={role}"));
        (id, rx)
    }

    /// Link the configured device `name`
    pub fn device(&mut self, name: &str) -> (ConnectionId, LinkRx) {
        self.link(LinkKind::Device(name.to_string()))
    }

    pub fn link(&mut self, kind: LinkKind) -> (ConnectionId, LinkRx) {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = format!("127.0.0.1:{}", 40000 + self.next_id).parse().unwrap();
        self.engine.on_connected(id, addr, kind, tx, self.start);
        (id, rx)
    }

    pub fn line(&mut self, id: ConnectionId, line: &str) {
        self.engine.on_line(id, line, self.start);
    }

    pub fn line_at(&mut self, id: ConnectionId, line: &str, at: Instant) {
        self.engine.on_line(id, line, at);
    }

    pub fn execute(&mut self, line: &str, origin: &str) -> Vec<String> {
        self.engine.execute(line, origin, self.start)
    }

    pub fn tick(&mut self) {
        self.engine.on_tick(self.start);
    }

    /// Attach a local output such as the console
    pub fn output(&mut self, name: &str) -> LinkRx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.engine.attach_output(name, tx);
        rx
    }
}

/// Every line currently queued on a link
pub fn drain(rx: &mut LinkRx) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}
