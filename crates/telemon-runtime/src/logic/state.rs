//! Engine State
//!
//! The [`Engine`] owns every piece of mutable relay state: the connection
//! registry, the device links, the aggregator and the local outputs. It is
//! driven through a handful of synchronous entry points (`on_connected`,
//! `on_line`, `on_disconnected`, `on_tick`, `poll_peers`, `execute`) and
//! never awaits, so any driver, including plain unit tests, can run it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use telemon_core::config::parse_interval;
use telemon_core::{
    ConnectionId, GlobalStatus, LogKind, LogRecord, MonitorConfig, Request, Sample, Source,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::handlers::RequestHandlers;
use crate::managers::{
    ConnectionRegistry, DeviceLink, PeerConnection, PlotSeries, ReplyOutcome, StatusAggregator,
};
use crate::sink::PersistenceSink;
use crate::transport::{LinkKind, LinkSender};

/// Capacity of the log subscriber channel
const LOG_CHANNEL_CAPACITY: usize = 256;

// ----------------------------------------------------------------------------
// Request Origin
// ----------------------------------------------------------------------------

/// Where a request came from and where its replies go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A protocol connection
    Peer(ConnectionId),
    /// A local surface such as the console or the web layer
    Local(String),
}

impl Origin {
    pub fn local(name: impl Into<String>) -> Self {
        Origin::Local(name.into())
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self {
            Origin::Peer(id) => Some(*id),
            Origin::Local(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local(_))
    }
}

// ----------------------------------------------------------------------------
// Engine Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub lines_received: u64,
    pub requests_handled: u64,
    pub unknown_requests: u64,
    pub unsolicited_replies: u64,
    pub expired_queries: u64,
    pub snapshots_persisted: u64,
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Relay state owned by the event loop
pub struct Engine {
    pub(crate) config: MonitorConfig,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) devices: IndexMap<String, DeviceLink>,
    pub(crate) aggregator: StatusAggregator,
    pub(crate) outputs: IndexMap<String, LinkSender>,
    pub(crate) stats: EngineStats,
    sink: Option<Arc<dyn PersistenceSink>>,
    logs: broadcast::Sender<LogRecord>,
    running: bool,
}

impl Engine {
    pub fn new(config: MonitorConfig) -> Self {
        let devices = config
            .devices
            .iter()
            .map(|(name, device)| (name.clone(), DeviceLink::new(name.clone(), device.clone())))
            .collect();
        let (logs, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);

        Self {
            aggregator: StatusAggregator::new(&config),
            registry: ConnectionRegistry::new(),
            devices,
            outputs: IndexMap::new(),
            stats: EngineStats::default(),
            sink: None,
            logs,
            running: true,
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// True when status snapshots and log records are persisted
    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    // ------------------------------------------------------------------------
    // Transport Entry Points
    // ------------------------------------------------------------------------

    /// A link came up
    pub fn on_connected(
        &mut self,
        id: ConnectionId,
        addr: SocketAddr,
        kind: LinkKind,
        outbound: LinkSender,
        now: Instant,
    ) {
        if let LinkKind::Device(name) = &kind {
            match self.devices.get_mut(name) {
                Some(device) => {
                    let dropped = device.on_connected(id, outbound);
                    if dropped > 0 {
                        debug!("{}: discarded {} stale queue entries", name, dropped);
                    }
                    let message = format!("{name} connected");
                    self.log_now(message, LogKind::Info);
                }
                None => warn!("Link {} reports unknown device '{}'", id, name),
            }
            return;
        }

        let mut connection = PeerConnection::new(id, addr, outbound, now);
        match connection.establish(&self.config.name) {
            Ok(handshake) => {
                for line in handshake {
                    connection.send(line);
                }
            }
            Err(e) => warn!("Link {}: {}", id, e),
        }

        if let LinkKind::Peer(name) = &kind {
            debug!("{} is the dialed link to {}", id, name);
        }
        self.registry.insert(connection);
    }

    /// A line arrived on a link
    pub fn on_line(&mut self, id: ConnectionId, line: &str, now: Instant) {
        self.stats.lines_received += 1;

        if let Some(name) = self.device_for(id) {
            self.on_device_reply(&name, line);
            return;
        }

        if !self.registry.contains(id) {
            debug!("Line from unknown link {} dropped", id);
            return;
        }

        let Some(request) = Request::parse(line) else {
            return;
        };
        let replies = RequestHandlers::dispatch(self, &Origin::Peer(id), request, now);
        if let Some(connection) = self.registry.get(id) {
            for reply in replies {
                connection.send(reply);
            }
        }
    }

    /// A link went away
    pub fn on_disconnected(&mut self, id: ConnectionId, reason: &str) {
        if let Some(name) = self.device_for(id) {
            if let Some(device) = self.devices.get_mut(&name) {
                let dropped = device.on_disconnected();
                info!("{}: link lost ({}), dropped {} queued commands", name, reason, dropped);
            }
            let message = format!("{name} disconnected");
            self.log_now(message, LogKind::Info);
            return;
        }

        let Some(mut connection) = self.registry.remove(id) else {
            return;
        };
        connection.disconnect();
        debug!("{} disconnected: {}", id, reason);

        if let Some(name) = connection.name().filter(|name| self.config.is_monitored(name)) {
            let message = format!("{name} disconnected");
            self.log_now(message, LogKind::Info);
        }
    }

    /// Advance every linked device queue by one step
    pub fn on_tick(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for device in self.devices.values_mut() {
            if let Some(entry) = device.tick(now) {
                expired.push((device.name().to_string(), entry));
            }
        }

        for (name, entry) in expired {
            self.stats.expired_queries += 1;
            warn!("{}: no reply to '{}', dropping it", name, entry.text());
            if let Some(requester) = entry.source().requester() {
                self.deliver(requester, &format!("error timeout {}", entry.text()));
            }
        }
    }

    /// Ask every peer that announced itself for a fresh status
    pub fn poll_peers(&mut self) {
        for connection in self.registry.iter().filter(|c| c.has_announced()) {
            connection.send("get_status");
        }
    }

    /// Run one command line on behalf of a local surface
    pub fn execute(&mut self, line: &str, origin: &str, now: Instant) -> Vec<String> {
        match Request::parse(line) {
            Some(request) => RequestHandlers::dispatch(self, &Origin::local(origin), request, now),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Send `text` to the device or peer called `name` on behalf of `source`
    pub fn route(&mut self, name: &str, text: &str, source: Source) -> bool {
        if let Some(device) = self.devices.get_mut(name) {
            device.enqueue(text, source);
            return true;
        }
        self.registry.send_to(name, text)
    }

    /// Send `text` to the device or identified peer called `name`
    pub fn send_to(&mut self, name: &str, text: &str) -> bool {
        self.route(name, text, Source::Engine)
    }

    /// Hand `text` to a named requester: a peer or a local output
    pub fn deliver(&mut self, name: &str, text: &str) -> bool {
        if self.registry.send_to(name, text) {
            return true;
        }
        match self.outputs.get(name) {
            Some(output) => output.send(text.to_string()).is_ok(),
            None => {
                debug!("Nobody called '{}' to deliver '{}' to", name, text);
                false
            }
        }
    }

    pub fn broadcast(&mut self, text: &str, role: Option<&str>, exclude: Option<ConnectionId>) -> usize {
        self.registry.broadcast(text, role, exclude)
    }

    /// Register a local surface receiving forwarded replies
    pub fn attach_output(&mut self, name: impl Into<String>, output: LinkSender) {
        self.outputs.insert(name.into(), output);
    }

    // ------------------------------------------------------------------------
    // Aggregated State
    // ------------------------------------------------------------------------

    pub fn global_status(&self) -> GlobalStatus {
        let mut view = GlobalStatus::new(self.connection_count(), self.aggregator.status_interval());

        for (name, _) in self.config.enabled_peers() {
            let snapshot = self.registry.find_by_name(name).map(|c| c.status().clone());
            view.insert(name.clone(), snapshot);
        }
        for (name, device) in &self.devices {
            view.insert(name.clone(), device.snapshot());
        }
        view
    }

    /// Live protocol connections plus linked devices
    pub fn connection_count(&self) -> usize {
        self.registry.len() + self.devices.values().filter(|d| d.is_connected()).count()
    }

    pub fn history(&self, peer: &str, variable: &str) -> Option<Vec<Sample>> {
        self.aggregator.history(peer, variable).map(<[Sample]>::to_vec)
    }

    pub fn plot_series(&self, peer: &str, plot: &str) -> Option<PlotSeries> {
        self.aggregator.plot_series(peer, plot)
    }

    pub fn reset_plots(&mut self) {
        self.aggregator.reset_plots();
        self.log_now("Resetting plots", LogKind::Info);
    }

    /// Apply `set interval=<raw>`; out-of-range values are ignored
    pub fn set_status_interval(&mut self, raw: &str) -> bool {
        match parse_interval(raw) {
            Ok(seconds) => {
                self.aggregator.set_status_interval(seconds);
                self.log_now(format!("Status interval set to {seconds} s"), LogKind::Info);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    pub(crate) fn persist_status(&mut self) {
        let Some(sink) = &self.sink else {
            return;
        };
        sink.append_status(Utc::now(), &self.global_status().to_json());
        self.stats.snapshots_persisted += 1;
    }

    // ------------------------------------------------------------------------
    // Logging
    // ------------------------------------------------------------------------

    /// Emit a log event, persist it and publish it to subscribers
    pub fn log(&self, message: impl Into<String>, time: DateTime<Utc>, source: &str, kind: LogKind) {
        let record = LogRecord::new(message, time, source, kind);

        match kind {
            LogKind::Debug => debug!(source = %record.source, "{}", record.message),
            LogKind::Error => error!(source = %record.source, "{}", record.message),
            LogKind::Warning => warn!(source = %record.source, "{}", record.message),
            LogKind::Info | LogKind::Message | LogKind::Success => {
                info!(source = %record.source, kind = %kind, "{}", record.message)
            }
        }

        if let Some(sink) = &self.sink {
            sink.append_log(&record);
        }
        // No subscribers is fine
        let _ = self.logs.send(record);
    }

    /// Log with the engine as source at the current time
    pub(crate) fn log_now(&self, message: impl Into<String>, kind: LogKind) {
        self.log(message, Utc::now(), &self.config.name, kind);
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogRecord> {
        self.logs.subscribe()
    }

    pub fn log_sender(&self) -> broadcast::Sender<LogRecord> {
        self.logs.clone()
    }

    // ------------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------------

    /// One line per live connection and device link
    pub fn connection_listing(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .registry
            .listing()
            .into_iter()
            .map(|info| {
                format!(
                    "{} {} name={} role={} {}",
                    info.id,
                    info.addr,
                    info.name.as_deref().unwrap_or("-"),
                    info.role.as_deref().unwrap_or("-"),
                    info.state.as_str()
                )
            })
            .collect();

        for device in self.devices.values() {
            if let Some(id) = device.connection_id() {
                lines.push(format!(
                    "{} {}:{} name={} role={} device queue={}",
                    id,
                    device.config().host,
                    device.config().port,
                    device.name(),
                    device.config().role,
                    device.queue().len()
                ));
            }
        }

        lines.push(format!("{} connections", self.connection_count()));
        lines
    }

    /// One line per configured peer and device with its link state
    pub fn client_listing(&self) -> Vec<String> {
        let peers = self.config.peers.iter().map(|(name, peer)| {
            let state = if !peer.enabled {
                "disabled"
            } else if self.registry.find_by_name(name).is_some() {
                "connected"
            } else {
                "disconnected"
            };
            format!(
                "{} {}:{} {} {}",
                name,
                peer.host,
                peer.port,
                state,
                peer.description.as_deref().unwrap_or("")
            )
        });

        let devices = self.devices.values().map(|device| {
            let state = if device.is_connected() { "connected" } else { "disconnected" };
            format!(
                "{} {}:{} {} device",
                device.name(),
                device.config().host,
                device.config().port,
                state
            )
        });

        peers
            .chain(devices)
            .map(|line| line.trim_end().to_string())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn device(&self, name: &str) -> Option<&DeviceLink> {
        self.devices.get(name)
    }

    pub fn aggregator(&self) -> &StatusAggregator {
        &self.aggregator
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop the engine and detach local outputs so their readers see the end
    pub fn stop(&mut self) {
        self.running = false;
        self.outputs.clear();
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn device_for(&self, id: ConnectionId) -> Option<String> {
        self.devices
            .values()
            .find(|device| device.connection_id() == Some(id))
            .map(|device| device.name().to_string())
    }

    fn on_device_reply(&mut self, name: &str, line: &str) {
        let Some(device) = self.devices.get_mut(name) else {
            return;
        };

        match device.on_reply(line) {
            ReplyOutcome::Updated { key, value } => debug!("{}: {}={}", name, key, value),
            ReplyOutcome::Forward { to, text } => {
                self.deliver(&to, &text);
            }
            ReplyOutcome::Ignored { command } => {
                debug!("{}: reply to '{}' has no status field", name, command)
            }
            ReplyOutcome::Unsolicited => {
                self.stats.unsolicited_replies += 1;
                warn!("{}: unsolicited reply '{}' discarded", name, line);
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.config.name)
            .field("connections", &self.registry.len())
            .field("devices", &self.devices.len())
            .field("running", &self.running)
            .finish()
    }
}
