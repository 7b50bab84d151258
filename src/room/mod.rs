//! Room Module
//!
//! The room actor that drives commit rounds: role dispatch, phase
//! transitions, timeouts, election and the termination protocol. All
//! replica state is owned by a single task and mutated one mailbox
//! message at a time.

pub mod protocol;

mod actor;
mod coordinator;
mod election;
mod participant;

pub use actor::{Room, RoomHandle, RoomMsg, RoomStatus, TimeoutMsg};

use std::time::Duration;

/// Timing knobs for a room replica
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Replica identity; must parse as a non-negative integer
    pub self_id: String,
    /// Heartbeat send interval
    pub beatrate: Duration,
    /// Liveness threshold, also the delay of every commit-phase timeout
    pub alive_threshold: Duration,
    /// Delay before deciding whether to self-promote to coordinator
    pub startup_delay: Duration,
}

impl RoomConfig {
    /// Defaults matching the stock configuration file
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            beatrate: Duration::from_millis(500),
            alive_threshold: Duration::from_millis(2000),
            startup_delay: Duration::from_millis(3000),
        }
    }
}
