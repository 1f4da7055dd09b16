//! Aggregated status view
//!
//! [`GlobalStatus`] is computed on demand by the engine and rendered either
//! as a flat `status ...` line for protocol peers or as a JSON object for the
//! web layer and the persistence sink.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::protocol::wire::{format_keywords, quote_if_needed};

/// Key/value snapshot as reported by one peer, in wire order
pub type StatusMap = IndexMap<String, String>;

/// Snapshot of every configured peer plus connection metadata
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStatus {
    /// Number of live connections
    pub nconnected: usize,
    /// Persistence interval in seconds
    pub db_status_interval: f64,
    /// Configured peers in configuration order; `None` when not connected
    pub peers: IndexMap<String, Option<StatusMap>>,
}

impl GlobalStatus {
    pub fn new(nconnected: usize, db_status_interval: f64) -> Self {
        Self {
            nconnected,
            db_status_interval,
            peers: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, snapshot: Option<StatusMap>) {
        self.peers.insert(name.into(), snapshot);
    }

    /// Status of a connected peer
    pub fn peer(&self, name: &str) -> Option<&StatusMap> {
        self.peers.get(name).and_then(Option::as_ref)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.peer(name).is_some()
    }

    /// Flat protocol rendering:
    /// `status nconnected=N db_status_interval=I peer=1 peer.key=value other=0`
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "status nconnected={} db_status_interval={}",
            self.nconnected, self.db_status_interval
        );

        for (name, snapshot) in &self.peers {
            match snapshot {
                Some(status) => {
                    line.push_str(&format!(" {}=1", quote_if_needed(name)));
                    if !status.is_empty() {
                        line.push(' ');
                        line.push_str(&format_keywords(status, &format!("{name}.")));
                    }
                }
                None => line.push_str(&format!(" {}=0", quote_if_needed(name))),
            }
        }

        line
    }

    /// Structured rendering; disconnected peers map to `{}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for GlobalStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let empty = StatusMap::new();
        let mut map = serializer.serialize_map(Some(self.peers.len() + 2))?;
        map.serialize_entry("nconnected", &self.nconnected)?;
        map.serialize_entry("db_status_interval", &self.db_status_interval)?;
        for (name, snapshot) in &self.peers {
            map.serialize_entry(name, snapshot.as_ref().unwrap_or(&empty))?;
        }
        map.end()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
