//! Monitor Task Implementation
//!
//! Contains the [`MonitorTask`] event loop and the [`Control`] requests that
//! runtime handles send to it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use telemon_core::{GlobalStatus, LogKind, Sample};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::state::Engine;
use crate::managers::PlotSeries;
use crate::transport::{LinkSender, TransportEvent};

// ----------------------------------------------------------------------------
// Control Requests
// ----------------------------------------------------------------------------

/// Requests from runtime handles, answered through oneshot channels
#[derive(Debug)]
pub enum Control {
    Execute {
        line: String,
        origin: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    GlobalStatus {
        reply: oneshot::Sender<GlobalStatus>,
    },
    SendTo {
        name: String,
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        text: String,
        role: Option<String>,
        reply: oneshot::Sender<usize>,
    },
    Log {
        message: String,
        time: DateTime<Utc>,
        source: String,
        kind: LogKind,
    },
    History {
        peer: String,
        variable: String,
        reply: oneshot::Sender<Option<Vec<Sample>>>,
    },
    PlotSeries {
        peer: String,
        plot: String,
        reply: oneshot::Sender<Option<PlotSeries>>,
    },
    AttachOutput {
        name: String,
        output: LinkSender,
    },
    Shutdown,
}

// ----------------------------------------------------------------------------
// Monitor Task
// ----------------------------------------------------------------------------

/// The task that owns the engine and serializes everything it does
pub struct MonitorTask {
    engine: Engine,
    events: mpsc::Receiver<TransportEvent>,
    controls: mpsc::Receiver<Control>,
    queue_tick: Duration,
    peer_poll: Duration,
}

impl MonitorTask {
    pub fn new(
        engine: Engine,
        events: mpsc::Receiver<TransportEvent>,
        controls: mpsc::Receiver<Control>,
    ) -> Self {
        let queue_tick = engine.config().queue_tick();
        let peer_poll = engine.config().peer_poll_interval();
        Self {
            engine,
            events,
            controls,
            queue_tick,
            peer_poll,
        }
    }

    /// Run until shutdown, `exit`, or every handle is dropped
    pub async fn run(mut self) -> Engine {
        info!("Monitor task starting as '{}'", self.engine.config().name);

        let mut queue_tick = time::interval(self.queue_tick);
        queue_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut peer_poll = time::interval_at(Instant::now() + self.peer_poll, self.peer_poll);
        peer_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut transport_open = true;
        while self.engine.is_running() {
            tokio::select! {
                event = self.events.recv(), if transport_open => match event {
                    Some(event) => self.process_event(event),
                    None => {
                        debug!("Transport event channel closed");
                        transport_open = false;
                    }
                },

                control = self.controls.recv() => match control {
                    Some(control) => self.process_control(control),
                    None => {
                        info!("Control channel closed, shutting down");
                        break;
                    }
                },

                _ = queue_tick.tick() => self.engine.on_tick(Instant::now().into_std()),

                _ = peer_poll.tick() => self.engine.poll_peers(),
            }
        }

        info!("Monitor task stopped");
        self.engine
    }

    fn process_event(&mut self, event: TransportEvent) {
        let now = Instant::now().into_std();
        match event {
            TransportEvent::Connected {
                id,
                addr,
                kind,
                outbound,
            } => self.engine.on_connected(id, addr, kind, outbound, now),
            TransportEvent::Line { id, line } => self.engine.on_line(id, &line, now),
            TransportEvent::Disconnected { id, reason } => self.engine.on_disconnected(id, &reason),
        }
    }

    fn process_control(&mut self, control: Control) {
        // A dropped oneshot receiver only means the caller stopped waiting
        match control {
            Control::Execute {
                line,
                origin,
                reply,
            } => {
                let replies = self
                    .engine
                    .execute(&line, &origin, Instant::now().into_std());
                let _ = reply.send(replies);
            }
            Control::GlobalStatus { reply } => {
                let _ = reply.send(self.engine.global_status());
            }
            Control::SendTo { name, text, reply } => {
                let _ = reply.send(self.engine.send_to(&name, &text));
            }
            Control::Broadcast { text, role, reply } => {
                let _ = reply.send(self.engine.broadcast(&text, role.as_deref(), None));
            }
            Control::Log {
                message,
                time,
                source,
                kind,
            } => self.engine.log(message, time, &source, kind),
            Control::History {
                peer,
                variable,
                reply,
            } => {
                let _ = reply.send(self.engine.history(&peer, &variable));
            }
            Control::PlotSeries { peer, plot, reply } => {
                let _ = reply.send(self.engine.plot_series(&peer, &plot));
            }
            Control::AttachOutput { name, output } => self.engine.attach_output(name, output),
            Control::Shutdown => self.engine.stop(),
        }
    }
}
