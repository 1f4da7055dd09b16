//! Runtime Builder API
//!
//! Provides a builder-style API for consumers (CLI, web layer, tests) to
//! start the engine with its transport and get a cloneable handle to it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use telemon_core::{GlobalStatus, LogKind, LogRecord, MonitorConfig, Sample};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::logic::{Control, Engine, MonitorTask};
use crate::managers::PlotSeries;
use crate::sink::{JsonLinesSink, PersistenceSink};
use crate::transport::{self, ConnectionIds, LinkKind};
use crate::{Result, RuntimeError};

/// Default capacity of the transport and control channels
const DEFAULT_CHANNEL_BUFFER: usize = 1024;

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a running telemon engine
pub struct RuntimeBuilder {
    config: MonitorConfig,
    sink: Option<Arc<dyn PersistenceSink>>,
    dial: bool,
    channel_buffer_size: usize,
}

impl RuntimeBuilder {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            sink: None,
            dial: true,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER,
        }
    }

    /// Use `sink` instead of the configured status log
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Do not dial configured peers and devices
    pub fn without_dialing(mut self) -> Self {
        self.dial = false;
        self
    }

    pub fn channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size.max(1);
        self
    }

    /// Validate the configuration, bind the listener and start every task
    pub async fn build_and_start(self) -> Result<RuntimeHandle> {
        self.config.validate()?;
        info!("Starting telemon engine '{}'", self.config.name);

        let mut background = Vec::new();
        let mut sink_writer = None;

        let sink = match (self.sink, &self.config.status_log) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => {
                let (sink, writer) = JsonLinesSink::open(path).await?;
                info!("Persisting status to {}", path);
                sink_writer = Some(writer);
                Some(Arc::new(sink) as Arc<dyn PersistenceSink>)
            }
            (None, None) => None,
        };

        let (events_tx, events_rx) = mpsc::channel(self.channel_buffer_size);
        let (controls_tx, controls_rx) = mpsc::channel(self.channel_buffer_size);
        let ids = ConnectionIds::new();

        let mut local_addr = None;
        if self.config.server {
            let addr = format!("{}:{}", self.config.bind_address, self.config.port);
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|source| RuntimeError::Bind { addr: addr.clone(), source })?;
            local_addr = Some(listener.local_addr()?);
            info!("Listening on {}", addr);
            background.push(tokio::spawn(transport::serve(
                listener,
                ids.clone(),
                events_tx.clone(),
            )));
        }

        if self.dial {
            let reconnect = self.config.reconnect_interval();
            let peers = self
                .config
                .enabled_peers()
                .filter(|(_, peer)| peer.dials())
                .map(|(name, peer)| (peer.host.clone(), peer.port, LinkKind::Peer(name.clone())));
            let devices = self.config.devices.iter().map(|(name, device)| {
                (device.host.clone(), device.port, LinkKind::Device(name.clone()))
            });

            for (host, port, kind) in peers.chain(devices) {
                background.push(tokio::spawn(transport::dial(
                    host,
                    port,
                    kind,
                    reconnect,
                    ids.clone(),
                    events_tx.clone(),
                )));
            }
        }
        drop(events_tx);

        let mut engine = Engine::new(self.config);
        if let Some(sink) = sink {
            engine = engine.with_sink(sink);
        }
        let logs = engine.log_sender();

        let task = MonitorTask::new(engine, events_rx, controls_rx);
        let engine_handle = tokio::spawn(task.run());

        Ok(RuntimeHandle {
            controls: controls_tx,
            logs,
            local_addr,
            engine_handle: Some(engine_handle),
            sink_writer,
            background,
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running engine
pub struct RuntimeHandle {
    controls: mpsc::Sender<Control>,
    logs: broadcast::Sender<LogRecord>,
    local_addr: Option<SocketAddr>,
    engine_handle: Option<JoinHandle<Engine>>,
    sink_writer: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Address the listener is bound to, when serving
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// A sender for raw control requests
    pub fn control_sender(&self) -> mpsc::Sender<Control> {
        self.controls.clone()
    }

    pub async fn global_status(&self) -> Result<GlobalStatus> {
        self.request(|reply| Control::GlobalStatus { reply }).await
    }

    /// Send `text` to the device or peer called `name`
    pub async fn send_to(&self, name: &str, text: &str) -> Result<bool> {
        let (name, text) = (name.to_string(), text.to_string());
        self.request(|reply| Control::SendTo { name, text, reply }).await
    }

    /// Send `text` to every identified peer, optionally only to one role
    pub async fn broadcast(&self, text: &str, role: Option<&str>) -> Result<usize> {
        let text = text.to_string();
        let role = role.map(str::to_string);
        self.request(|reply| Control::Broadcast { text, role, reply }).await
    }

    pub async fn log(&self, message: &str, source: &str, kind: LogKind) -> Result<()> {
        self.send(Control::Log {
            message: message.to_string(),
            time: Utc::now(),
            source: source.to_string(),
            kind,
        })
        .await
    }

    /// Run a command line as the local surface `origin` and collect replies
    pub async fn execute(&self, line: &str, origin: &str) -> Result<Vec<String>> {
        let (line, origin) = (line.to_string(), origin.to_string());
        self.request(|reply| Control::Execute { line, origin, reply })
            .await
    }

    pub async fn history(&self, peer: &str, variable: &str) -> Result<Option<Vec<Sample>>> {
        let (peer, variable) = (peer.to_string(), variable.to_string());
        self.request(|reply| Control::History {
            peer,
            variable,
            reply,
        })
        .await
    }

    pub async fn plot_series(&self, peer: &str, plot: &str) -> Result<Option<PlotSeries>> {
        let (peer, plot) = (peer.to_string(), plot.to_string());
        self.request(|reply| Control::PlotSeries { peer, plot, reply })
            .await
    }

    /// Receive replies forwarded to the local surface `name`
    pub async fn attach_output(&self, name: &str) -> Result<mpsc::UnboundedReceiver<String>> {
        let (output, rx) = mpsc::unbounded_channel();
        self.send(Control::AttachOutput {
            name: name.to_string(),
            output,
        })
        .await?;
        Ok(rx)
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogRecord> {
        self.logs.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.engine_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the engine to stop on its own, e.g. after `exit`
    pub async fn wait(&mut self) -> Result<()> {
        if let Some(handle) = self.engine_handle.take() {
            if let Err(e) = handle.await {
                warn!("Monitor task ended abnormally: {}", e);
            }
        }
        self.stop_background().await;
        Ok(())
    }

    /// Stop the engine and every transport task
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down telemon engine");
        let _ = self.controls.send(Control::Shutdown).await;

        if let Some(handle) = self.engine_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }
        self.stop_background().await;
        info!("telemon engine shut down");
        Ok(())
    }

    /// Abort link tasks; the sink writer drains once the engine is gone
    async fn stop_background(&mut self) {
        for handle in &self.background {
            handle.abort();
        }
        futures::future::join_all(self.background.drain(..)).await;

        if let Some(writer) = self.sink_writer.take() {
            if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
                warn!("Status log writer did not finish in time");
            }
        }
    }

    async fn send(&self, control: Control) -> Result<()> {
        self.controls
            .send(control)
            .await
            .map_err(|_| RuntimeError::ChannelClosed("control"))
    }

    async fn request<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Control,
    {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed("reply"))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            server: true,
            bind_address: "127.0.0.1".into(),
            port: 0,
            ..MonitorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_runtime_builder() {
        let mut runtime = RuntimeBuilder::new(test_config())
            .without_dialing()
            .build_and_start()
            .await
            .expect("Failed to build runtime");

        assert!(runtime.is_running());
        assert!(runtime.local_addr().is_some_and(|addr| addr.port() != 0));

        let status = runtime.global_status().await.unwrap();
        assert_eq!(status.nconnected, 0);

        runtime.shutdown().await.expect("Failed to shutdown");
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_exit_stops_engine() {
        let mut runtime = RuntimeBuilder::new(MonitorConfig::default())
            .build_and_start()
            .await
            .unwrap();

        runtime.execute("exit", "console").await.unwrap();
        runtime.wait().await.unwrap();
        assert!(!runtime.is_running());
        assert!(runtime.global_status().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = MonitorConfig {
            db_status_interval: 7200.0,
            ..MonitorConfig::default()
        };
        assert!(RuntimeBuilder::new(config).build_and_start().await.is_err());
    }
}
