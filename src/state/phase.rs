//! Commit-round state: roles, updates, votes and the 3PC phase ladder.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::net::PeerLink;

/// Role a replica announces through its heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Drives commit rounds for the cluster
    Coordinator,
    /// Votes in commit rounds
    Participant,
    /// Does not vote; still heartbeats and serves reads
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => write!(f, "coordinator"),
            Role::Participant => write!(f, "participant"),
            Role::Observer => write!(f, "observer"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coordinator" => Ok(Role::Coordinator),
            "participant" => Ok(Role::Participant),
            "observer" => Ok(Role::Observer),
            other => Err(Error::Protocol(format!("unknown role {other:?}"))),
        }
    }
}

/// A participant's answer to a vote request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Yes,
    No,
}

/// Outcome of a commit round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Commit,
    Abort,
}

/// Local round state reported during the termination protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Aborted,
    Uncertain,
    Committable,
    Committed,
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitState::Aborted => write!(f, "aborted"),
            CommitState::Uncertain => write!(f, "uncertain"),
            CommitState::Committable => write!(f, "committable"),
            CommitState::Committed => write!(f, "committed"),
        }
    }
}

impl FromStr for CommitState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aborted" => Ok(CommitState::Aborted),
            "uncertain" => Ok(CommitState::Uncertain),
            "committable" => Ok(CommitState::Committable),
            "committed" => Ok(CommitState::Committed),
            other => Err(Error::Protocol(format!("unknown commit state {other:?}"))),
        }
    }
}

/// A single song-list mutation moved through a commit round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Add { name: String, url: String },
    Delete { name: String },
}

impl Update {
    /// The application-level vote rule: a replica with numeric id `d`
    /// rejects an add whose URL is longer than `d + 5`. Deletes are
    /// always accepted.
    pub fn vote(&self, self_num: u64) -> Vote {
        match self {
            Update::Add { url, .. } => {
                if url.len() as u64 > self_num + 5 {
                    Vote::No
                } else {
                    Vote::Yes
                }
            }
            Update::Delete { .. } => Vote::Yes,
        }
    }

    /// Apply the mutation to a song list. Deleting a missing song is a
    /// no-op.
    pub fn apply(&self, songs: &mut BTreeMap<String, String>) {
        match self {
            Update::Add { name, url } => {
                songs.insert(name.clone(), url.clone());
            }
            Update::Delete { name } => {
                songs.remove(name);
            }
        }
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Add { name, url } => write!(f, "add {name} {url}"),
            Update::Delete { name } => write!(f, "delete {name}"),
        }
    }
}

/// Snapshot of the alive participants taken when a round starts; fixed
/// for the lifetime of that round.
pub type UpSet = BTreeMap<String, PeerLink>;

/// The 3PC sub-state of the current commit round.
///
/// Vote and ack sets hold replica ids and are always subsets of the
/// round's up-set.
#[derive(Debug)]
pub enum CommitPhase {
    /// Before any role has been established
    Start,
    /// Coordinator with no round in flight
    CoordWaiting,
    /// Vote requests broadcast; collecting yes votes
    CoordInitCommit {
        update: Update,
        up_set: UpSet,
        votes: BTreeSet<String>,
    },
    /// Precommit broadcast; collecting precommit acks
    CoordCommitable {
        update: Update,
        up_set: UpSet,
        acks: BTreeSet<String>,
    },
    CoordCommitted,
    CoordAborted,
    /// Voted yes; waiting for the precommit
    ParticipantInitCommit { update: Update, up_set: UpSet },
    /// Acked the precommit; waiting for the commit
    ParticipantCommitable { update: Update, up_set: UpSet },
    ParticipantCommitted,
    ParticipantAborted,
}

impl CommitPhase {
    /// Short name for logging and status reporting
    pub fn name(&self) -> &'static str {
        match self {
            CommitPhase::Start => "Start",
            CommitPhase::CoordWaiting => "CoordWaiting",
            CommitPhase::CoordInitCommit { .. } => "CoordInitCommit",
            CommitPhase::CoordCommitable { .. } => "CoordCommitable",
            CommitPhase::CoordCommitted => "CoordCommitted",
            CommitPhase::CoordAborted => "CoordAborted",
            CommitPhase::ParticipantInitCommit { .. } => "ParticipantInitCommit",
            CommitPhase::ParticipantCommitable { .. } => "ParticipantCommitable",
            CommitPhase::ParticipantCommitted => "ParticipantCommitted",
            CommitPhase::ParticipantAborted => "ParticipantAborted",
        }
    }

    /// The state reported in reply to a `statereq`, or `None` when
    /// this replica holds no round at all. A replica that never saw
    /// the vote request has nothing to say and must not pass for a
    /// real abort.
    ///
    /// A coordinator still collecting votes can unilaterally abort, so
    /// vote collection reports aborted. Only a participant that voted
    /// yes and is waiting on the precommit is genuinely uncertain.
    pub fn commit_state(&self) -> Option<CommitState> {
        match self {
            CommitPhase::Start | CommitPhase::CoordWaiting => None,
            CommitPhase::CoordInitCommit { .. }
            | CommitPhase::CoordAborted
            | CommitPhase::ParticipantAborted => Some(CommitState::Aborted),
            CommitPhase::ParticipantInitCommit { .. } => Some(CommitState::Uncertain),
            CommitPhase::CoordCommitable { .. } | CommitPhase::ParticipantCommitable { .. } => {
                Some(CommitState::Committable)
            }
            CommitPhase::CoordCommitted | CommitPhase::ParticipantCommitted => {
                Some(CommitState::Committed)
            }
        }
    }

    /// Whether the round has reached a decision on this replica
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommitPhase::CoordCommitted
                | CommitPhase::CoordAborted
                | CommitPhase::ParticipantCommitted
                | CommitPhase::ParticipantAborted
        )
    }
}
