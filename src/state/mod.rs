//! Replica State Module
//!
//! Core state carried by the room actor: the commit-phase ladder and
//! the heartbeat-driven failure detector.

mod beatmap;
mod phase;

pub use beatmap::{BeatEntry, BeatMap};
pub use phase::{CommitPhase, CommitState, Decision, Role, UpSet, Update, Vote};
