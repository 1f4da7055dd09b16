//! Connection registry and broadcast routing

use std::collections::BTreeMap;
use std::net::SocketAddr;

use telemon_core::ConnectionId;

use super::connection::{ConnectionState, PeerConnection};

/// Snapshot of one connection for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub name: Option<String>,
    pub role: Option<String>,
    pub state: ConnectionState,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub messages_routed: u64,
    pub broadcasts: u64,
}

/// Live protocol connections, ordered by connection id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, PeerConnection>,
    stats: RegistryStats,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: PeerConnection) {
        self.stats.connections_opened += 1;
        self.connections.insert(connection.id(), connection);
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<PeerConnection> {
        let removed = self.connections.remove(&id);
        if removed.is_some() {
            self.stats.connections_closed += 1;
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PeerConnection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut PeerConnection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Oldest identified connection announcing `name`
    pub fn find_by_name(&self, name: &str) -> Option<&PeerConnection> {
        self.connections
            .values()
            .find(|conn| conn.is_identified() && conn.name() == Some(name))
    }

    /// Send `text` to the connection called `name`; false when nobody matched
    pub fn send_to(&mut self, name: &str, text: &str) -> bool {
        let delivered = self
            .find_by_name(name)
            .is_some_and(|conn| conn.send(text));
        if delivered {
            self.stats.messages_routed += 1;
        }
        delivered
    }

    /// Send `text` to every identified connection matching `role`, skipping
    /// `exclude`; returns the number of deliveries
    pub fn broadcast(
        &mut self,
        text: &str,
        role: Option<&str>,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let delivered = self
            .connections
            .values()
            .filter(|conn| conn.is_identified())
            .filter(|conn| Some(conn.id()) != exclude)
            .filter(|conn| role.map_or(true, |role| conn.role() == Some(role)))
            .filter(|conn| conn.send(text))
            .count();

        self.stats.broadcasts += 1;
        self.stats.messages_routed += delivered as u64;
        delivered
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn listing(&self) -> Vec<ConnectionInfo> {
        self.connections
            .values()
            .map(|conn| ConnectionInfo {
                id: conn.id(),
                addr: conn.addr(),
                name: conn.name().map(str::to_string),
                role: conn.role().map(str::to_string),
                state: conn.state(),
            })
            .collect()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
