//! Peer connection state
//!
//! A [`PeerConnection`] is one protocol link together with the identity the
//! peer announced and the last status snapshot it reported. Its lifecycle is
//! a small state machine:
//!
//! ```text
//! Connecting --Established--> Unidentified --Identified--> Identified
//!      \                            |                  (re-identify) |
//!       `---------Lost--------------+-----------Lost-----------------'--> Disconnected
//! ```

use std::net::SocketAddr;
use std::time::Instant;

use telemon_core::protocol::{quote_if_needed, ENGINE_ROLE};
use telemon_core::{ConnectionId, StatusMap};

use crate::transport::LinkSender;

// ----------------------------------------------------------------------------
// Connection State Machine
// ----------------------------------------------------------------------------

/// Lifecycle state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Unidentified,
    Identified,
    /// Terminal
    Disconnected,
}

/// Inputs driving [`ConnectionState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Established,
    Identified,
    Lost,
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition from {from:?} on {event:?}")]
pub struct StateTransitionError {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

impl ConnectionState {
    pub fn transition(self, event: ConnectionEvent) -> Result<Self, StateTransitionError> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Connecting, E::Established) => Ok(S::Unidentified),
            (S::Unidentified | S::Identified, E::Identified) => Ok(S::Identified),
            (S::Connecting | S::Unidentified | S::Identified, E::Lost) => Ok(S::Disconnected),
            (from, event) => Err(StateTransitionError { from, event }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Unidentified => "unidentified",
            ConnectionState::Identified => "identified",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Connection
// ----------------------------------------------------------------------------

/// One live protocol link
#[derive(Debug)]
pub struct PeerConnection {
    id: ConnectionId,
    addr: SocketAddr,
    state: ConnectionState,
    name: Option<String>,
    role: Option<String>,
    status: StatusMap,
    outbound: LinkSender,
    connected_at: Instant,
}

impl PeerConnection {
    pub fn new(id: ConnectionId, addr: SocketAddr, outbound: LinkSender, now: Instant) -> Self {
        Self {
            id,
            addr,
            state: ConnectionState::Connecting,
            name: None,
            role: None,
            status: StatusMap::new(),
            outbound,
            connected_at: now,
        }
    }

    /// Mark the link established and return the handshake lines to send
    pub fn establish(&mut self, engine_name: &str) -> Result<[String; 2], StateTransitionError> {
        self.state = self.state.transition(ConnectionEvent::Established)?;
        Ok([identity_line(engine_name), "get_id".to_string()])
    }

    /// Apply an `id` announcement; fields absent from it are kept
    pub fn identify(
        &mut self,
        name: Option<String>,
        role: Option<String>,
    ) -> Result<(), StateTransitionError> {
        self.state = self.state.transition(ConnectionEvent::Identified)?;
        if name.is_some() {
            self.name = name;
        }
        if role.is_some() {
            self.role = role;
        }
        Ok(())
    }

    /// Replace the status snapshot wholesale
    pub fn update_status(&mut self, status: StatusMap) {
        self.status = status;
    }

    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Queue a line on the link; false once the link task is gone
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.state != ConnectionState::Disconnected && self.outbound.send(line.into()).is_ok()
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn status(&self) -> &StatusMap {
        &self.status
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn is_identified(&self) -> bool {
        self.state == ConnectionState::Identified
    }

    /// Whether the peer has announced a name or a role
    pub fn has_announced(&self) -> bool {
        self.name.is_some() || self.role.is_some()
    }

    /// Name used as log source: the announced name or the connection id
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// Our side of the identity handshake
pub fn identity_line(engine_name: &str) -> String {
    format!("id name={} role={}", quote_if_needed(engine_name), ENGINE_ROLE)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection() -> (PeerConnection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = "127.0.0.1:7001".parse().unwrap();
        (PeerConnection::new(ConnectionId::new(1), addr, tx, Instant::now()), rx)
    }

    #[test]
    fn test_handshake_lines() {
        let (mut conn, _rx) = connection();
        let lines = conn.establish("monitor").unwrap();
        assert_eq!(lines, ["id name=monitor role=monitor", "get_id"]);
        assert_eq!(conn.state(), ConnectionState::Unidentified);
    }

    #[test]
    fn test_identify_and_reidentify() {
        let (mut conn, _rx) = connection();
        conn.establish("monitor").unwrap();

        conn.identify(Some("ccd1".into()), Some("ccd".into())).unwrap();
        assert!(conn.is_identified());
        assert_eq!(conn.name(), Some("ccd1"));

        conn.identify(None, Some("producer".into())).unwrap();
        assert_eq!(conn.name(), Some("ccd1"));
        assert_eq!(conn.role(), Some("producer"));
    }

    #[test]
    fn test_disconnected_is_terminal() {
        assert_eq!(
            ConnectionState::Identified.transition(ConnectionEvent::Lost),
            Ok(ConnectionState::Disconnected)
        );
        for event in [
            ConnectionEvent::Established,
            ConnectionEvent::Identified,
            ConnectionEvent::Lost,
        ] {
            assert!(ConnectionState::Disconnected.transition(event).is_err());
        }
    }

    #[test]
    fn test_identify_before_establish_is_rejected() {
        let (mut conn, _rx) = connection();
        assert!(conn.identify(Some("ccd1".into()), None).is_err());
    }

    #[test]
    fn test_send_stops_after_disconnect() {
        let (mut conn, mut rx) = connection();
        assert!(conn.send("get_status"));
        assert_eq!(rx.try_recv().unwrap(), "get_status");

        conn.disconnect();
        assert!(!conn.send("get_status"));
    }
}
