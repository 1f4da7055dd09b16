//! Request Handlers
//!
//! One handler per [`Request`] variant. Handlers mutate the engine and return
//! the lines to send back to the origin; protocol-level problems are logged
//! and absorbed, never returned as errors.

use std::time::Instant;

use chrono::Utc;
use telemon_core::{LogKind, Request, Source, StatusMap};
use tracing::{debug, warn};

use super::state::{Engine, Origin};
use crate::managers::connection::identity_line;

/// Request handlers for the engine
pub struct RequestHandlers;

impl RequestHandlers {
    /// Route a request to its handler
    pub fn dispatch(engine: &mut Engine, origin: &Origin, request: Request, now: Instant) -> Vec<String> {
        engine.stats.requests_handled += 1;

        match request {
            Request::Id { name, role } => Self::handle_id(engine, origin, name, role),
            Request::GetId => vec![identity_line(&engine.config.name)],
            Request::Status(status) => Self::handle_status(engine, origin, status, now),
            Request::GetStatus { json } => Self::handle_get_status(engine, json),
            Request::Send { target, payload } => Self::handle_send(engine, origin, &target, &payload),
            Request::ResetPlots => {
                engine.reset_plots();
                Vec::new()
            }
            Request::Log { kind, message } => Self::handle_log(engine, origin, kind, message),
            Request::Set { interval } => Self::handle_set(engine, interval),
            Request::Broadcast { payload } => {
                let delivered = engine.broadcast(&payload, None, origin.connection_id());
                debug!("Broadcast '{}' reached {} connections", payload, delivered);
                Vec::new()
            }
            Request::Exit => Self::local_only(origin, "exit", |_| {
                engine.stop();
                Vec::new()
            }),
            Request::Connections => {
                Self::local_only(origin, "connections", |_| engine.connection_listing())
            }
            Request::Clients => Self::local_only(origin, "clients", |_| engine.client_listing()),
            Request::Unknown(name) => {
                engine.stats.unknown_requests += 1;
                debug!("Ignoring unknown command '{}' from {:?}", name, origin);
                Vec::new()
            }
        }
    }

    /// Handle an identity announcement
    pub fn handle_id(
        engine: &mut Engine,
        origin: &Origin,
        name: Option<String>,
        role: Option<String>,
    ) -> Vec<String> {
        let Some(connection) = origin.connection_id().and_then(|id| engine.registry.get_mut(id)) else {
            debug!("Ignoring id from {:?}", origin);
            return Vec::new();
        };

        if let Err(e) = connection.identify(name, role) {
            warn!("{}: {}", connection.id(), e);
            return Vec::new();
        }

        let identified = connection.name().map(str::to_string);
        debug!(
            "{} identified as {:?} ({:?})",
            connection.id(),
            identified,
            connection.role()
        );

        if let Some(name) = identified.filter(|name| engine.config.is_monitored(name)) {
            engine.log_now(format!("{name} connected"), LogKind::Info);
        }
        Vec::new()
    }

    /// Handle a status snapshot
    pub fn handle_status(
        engine: &mut Engine,
        origin: &Origin,
        status: StatusMap,
        now: Instant,
    ) -> Vec<String> {
        let Some(id) = origin.connection_id() else {
            return Vec::new();
        };
        let Some(connection) = engine.registry.get_mut(id) else {
            return Vec::new();
        };
        connection.update_status(status);

        if !connection.is_identified() {
            debug!("{}: status before identification, not aggregated", id);
            return Vec::new();
        }
        let Some(name) = connection.name().map(str::to_string) else {
            return Vec::new();
        };
        let role = connection.role().map(str::to_string);

        let outcome = engine.aggregator.on_status(
            &name,
            role.as_deref(),
            connection.status(),
            Utc::now(),
        );

        if let Some(keywords) = outcome.keywords {
            let role = engine.aggregator.keyword_role().to_string();
            engine.registry.broadcast(&keywords, Some(&role), Some(id));
        }
        if engine.has_sink() && engine.aggregator.should_persist(now) {
            engine.persist_status();
        }
        Vec::new()
    }

    /// Answer with the aggregated status, flat or as JSON
    pub fn handle_get_status(engine: &mut Engine, json: bool) -> Vec<String> {
        let view = engine.global_status();
        if !json {
            return vec![view.to_line()];
        }

        match serde_json::to_string(&view) {
            Ok(body) => vec![format!("status_json {body}")],
            Err(e) => {
                warn!("Cannot render status as JSON: {}", e);
                Vec::new()
            }
        }
    }

    /// Relay a payload to a named device or peer
    pub fn handle_send(engine: &mut Engine, origin: &Origin, target: &str, payload: &str) -> Vec<String> {
        let source = Source::named(Self::source_label(engine, origin));
        if !engine.route(target, payload, source) {
            debug!("Nobody called '{}', dropping '{}'", target, payload);
        }
        Vec::new()
    }

    /// Forward a log message with the origin as source
    pub fn handle_log(engine: &mut Engine, origin: &Origin, kind: LogKind, message: String) -> Vec<String> {
        let source = Self::source_label(engine, origin);
        engine.log(message, Utc::now(), &source, kind);
        Vec::new()
    }

    /// Apply `set` keywords
    pub fn handle_set(engine: &mut Engine, interval: Option<String>) -> Vec<String> {
        match interval {
            Some(raw) => {
                engine.set_status_interval(&raw);
            }
            None => debug!("set without a known keyword"),
        }
        Vec::new()
    }

    fn local_only<F>(origin: &Origin, command: &str, handler: F) -> Vec<String>
    where
        F: FnOnce(&Origin) -> Vec<String>,
    {
        if origin.is_local() {
            handler(origin)
        } else {
            debug!("Ignoring '{}' from {:?}", command, origin);
            Vec::new()
        }
    }

    /// Name replies to the origin are addressed to
    fn source_label(engine: &Engine, origin: &Origin) -> String {
        match origin {
            Origin::Local(name) => name.clone(),
            Origin::Peer(id) => engine
                .registry
                .get(*id)
                .map(|connection| connection.label())
                .unwrap_or_else(|| id.to_string()),
        }
    }
}
