//! Heartbeat Map
//!
//! Tracks the last heartbeat seen from every peer. Entries are never
//! evicted; liveness is purely a function of how old the last
//! heartbeat is.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::Role;
use crate::net::PeerLink;

/// Last-known heartbeat state of a single peer
#[derive(Debug, Clone)]
pub struct BeatEntry {
    /// Role the peer announced in its latest heartbeat
    pub role: Role,
    /// Capability handle to reach the peer
    pub link: PeerLink,
    /// When the latest heartbeat arrived
    pub last_seen: Instant,
}

impl BeatEntry {
    /// Check whether the peer counts as alive
    pub fn is_alive(&self, threshold: Duration) -> bool {
        self.last_seen.elapsed() < threshold
    }
}

/// Heartbeat tracker for all peers this replica has ever heard from
#[derive(Debug)]
pub struct BeatMap {
    entries: BTreeMap<String, BeatEntry>,
    alive_threshold: Duration,
}

impl BeatMap {
    /// Create an empty map with the given liveness threshold
    pub fn new(alive_threshold: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            alive_threshold,
        }
    }

    /// Record a heartbeat from a peer
    pub fn record(&mut self, id: String, role: Role, link: PeerLink) {
        self.entries.insert(
            id,
            BeatEntry {
                role,
                link,
                last_seen: Instant::now(),
            },
        );
    }

    /// Get a peer's latest entry, alive or not
    pub fn get(&self, id: &str) -> Option<&BeatEntry> {
        self.entries.get(id)
    }

    /// Check whether a peer is currently alive
    pub fn is_alive(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .map(|e| e.is_alive(self.alive_threshold))
            .unwrap_or(false)
    }

    /// Snapshot of all alive peers, optionally restricted to one role.
    /// This is the only definition of "up" in the system.
    pub fn alive(&self, role: Option<Role>) -> BTreeMap<String, BeatEntry> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_alive(self.alive_threshold))
            .filter(|(_, e)| role.map(|r| e.role == r).unwrap_or(true))
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect()
    }

    /// Number of peers ever heard from
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no peer has ever been heard from
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
