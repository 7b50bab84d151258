//! Coordinator Handlers
//!
//! Master update intake and the coordinator side of a commit round:
//! vote collection, precommit acks, and the timeout behavior of each
//! waiting state.

use std::collections::BTreeSet;
use std::mem;

use tracing::{debug, info, warn};

use super::actor::{Room, TimeoutMsg};
use super::protocol::WireMsg;
use crate::net::PeerLink;
use crate::state::{CommitPhase, Role, Update, Vote};

impl Room {
    /// Startup decision: with no coordinator observed and no live
    /// participant heartbeats, this replica takes the job.
    pub(super) fn handle_determine_coordinator(&mut self) {
        if self.state.coordinator.is_some() {
            debug!("coordinator already known, staying participant");
            return;
        }
        if !self.state.beatmap.alive(Some(Role::Participant)).is_empty() {
            debug!("live participants found, a round may be in progress");
            return;
        }

        info!(id = %self.cfg.self_id, "no coordinator observed, promoting self");
        self.state.role = Role::Coordinator;
        self.state.coordinator = Some(self.self_link.clone());
        self.state.phase = CommitPhase::CoordWaiting;
        self.restart_beats();
        self.notify_master(WireMsg::Heartbeat {
            role: Role::Coordinator,
            id: self.cfg.self_id.clone(),
        });
    }

    pub(super) fn handle_add(&mut self, name: String, url: String) {
        if !matches!(self.state.phase, CommitPhase::CoordWaiting) {
            warn!(
                phase = self.state.phase.name(),
                "add request outside CoordWaiting, ignoring"
            );
            return;
        }

        // The coordinator votes first; its own rejection ends the round
        // on the spot, without telling anyone.
        if url.len() as u64 > self.self_num + 5 {
            info!(%name, "rejected by own vote, aborting locally");
            self.state.commit_iter += 1;
            self.state.phase = CommitPhase::CoordAborted;
            return;
        }

        self.begin_round(Update::Add { name, url });
    }

    pub(super) fn handle_delete(&mut self, name: String) {
        if !matches!(self.state.phase, CommitPhase::CoordWaiting) {
            warn!(
                phase = self.state.phase.name(),
                "delete request outside CoordWaiting, ignoring"
            );
            return;
        }

        self.begin_round(Update::Delete { name });
    }

    /// Snapshot the up-set, fan out the vote request, and start waiting
    fn begin_round(&mut self, update: Update) {
        let up_set = self.alive_participants();
        info!(%update, participants = up_set.len(), "opening commit round");

        for link in up_set.values() {
            link.send(WireMsg::VoteReq(update.clone()));
        }
        self.schedule(TimeoutMsg::VoteReply {
            source_iter: self.state.commit_iter,
        });
        self.state.phase = CommitPhase::CoordInitCommit {
            update,
            up_set,
            votes: BTreeSet::new(),
        };
    }

    pub(super) fn handle_vote_reply(&mut self, from: PeerLink, vote: Vote) {
        let phase = mem::replace(&mut self.state.phase, CommitPhase::Start);
        match (phase, vote) {
            (
                CommitPhase::CoordInitCommit {
                    update,
                    up_set,
                    mut votes,
                },
                Vote::Yes,
            ) => {
                votes.insert(from.id().to_string());
                if votes.len() == up_set.len() {
                    debug!("votes unanimous, precommitting");
                    for link in up_set.values() {
                        link.send(WireMsg::PreCommit);
                    }
                    self.schedule(TimeoutMsg::AckPreCommit {
                        source_iter: self.state.commit_iter,
                    });
                    self.state.phase = CommitPhase::CoordCommitable {
                        update,
                        up_set,
                        acks: BTreeSet::new(),
                    };
                } else {
                    self.state.phase = CommitPhase::CoordInitCommit {
                        update,
                        up_set,
                        votes,
                    };
                }
            }
            (CommitPhase::CoordInitCommit { up_set, .. }, Vote::No) => {
                info!(voter = %from.id(), "vote rejected, aborting round");
                for (id, link) in &up_set {
                    if id != from.id() {
                        link.send(WireMsg::Abort);
                    }
                }
                self.notify_master(WireMsg::AckAbort);
                self.state.commit_iter += 1;
                self.state.phase = CommitPhase::CoordAborted;
                self.announce_observer();
            }
            (other, _) => {
                warn!(
                    voter = %from.id(),
                    phase = other.name(),
                    "vote reply outside vote collection, ignoring"
                );
                self.state.phase = other;
            }
        }
    }

    /// Stale iterations are filtered before this is called
    pub(super) fn handle_vote_reply_timeout(&mut self) {
        let phase = mem::replace(&mut self.state.phase, CommitPhase::Start);
        match phase {
            CommitPhase::CoordInitCommit {
                update,
                up_set,
                votes,
            } => {
                if votes.len() == up_set.len() && up_set.is_empty() {
                    info!("no live participants, committing alone");
                    self.commit_round(update);
                } else if votes.len() == up_set.len() {
                    // votes arrived concurrently with the timer firing
                    self.state.phase = CommitPhase::CoordInitCommit {
                        update,
                        up_set,
                        votes,
                    };
                } else {
                    warn!(
                        got = votes.len(),
                        expected = up_set.len(),
                        "vote collection timed out, aborting round"
                    );
                    for link in up_set.values() {
                        link.send(WireMsg::Abort);
                    }
                    self.notify_master(WireMsg::AckAbort);
                    self.state.commit_iter += 1;
                    self.state.phase = CommitPhase::CoordAborted;
                    self.announce_observer();
                }
            }
            other => {
                debug!(phase = other.name(), "vote timeout outside vote collection");
                self.state.phase = other;
            }
        }
    }

    pub(super) fn handle_ack_precommit(&mut self, from: PeerLink) {
        let phase = mem::replace(&mut self.state.phase, CommitPhase::Start);
        match phase {
            CommitPhase::CoordCommitable {
                update,
                up_set,
                mut acks,
            } => {
                acks.insert(from.id().to_string());
                if acks.len() == up_set.len() {
                    debug!("precommit fully acknowledged, committing");
                    for id in &acks {
                        if let Some(link) = up_set.get(id) {
                            link.send(WireMsg::Commit);
                        }
                    }
                    self.commit_round(update);
                } else {
                    self.state.phase = CommitPhase::CoordCommitable {
                        update,
                        up_set,
                        acks,
                    };
                }
            }
            other => {
                warn!(
                    from = %from.id(),
                    phase = other.name(),
                    "precommit ack outside ack collection, ignoring"
                );
                self.state.phase = other;
            }
        }
    }

    /// Missing acks do not block the round: whoever acknowledged the
    /// precommit is told to commit, the rest recover via termination.
    pub(super) fn handle_ack_precommit_timeout(&mut self) {
        let phase = mem::replace(&mut self.state.phase, CommitPhase::Start);
        match phase {
            CommitPhase::CoordCommitable {
                update,
                up_set,
                acks,
            } => {
                if !up_set.is_empty() && acks.len() == up_set.len() {
                    self.state.phase = CommitPhase::CoordCommitable {
                        update,
                        up_set,
                        acks,
                    };
                } else {
                    warn!(
                        acked = acks.len(),
                        expected = up_set.len(),
                        "precommit acks incomplete, committing with acked subset"
                    );
                    for id in &acks {
                        if let Some(link) = up_set.get(id) {
                            link.send(WireMsg::Commit);
                        }
                    }
                    self.commit_round(update);
                }
            }
            other => {
                debug!(phase = other.name(), "ack timeout outside ack collection");
                self.state.phase = other;
            }
        }
    }

    /// Terminal commit transition for the coordinator side
    pub(super) fn commit_round(&mut self, update: Update) {
        update.apply(&mut self.state.songlist);
        self.notify_master(WireMsg::AckCommit);
        self.state.commit_iter += 1;
        self.state.phase = CommitPhase::CoordCommitted;
        info!(songs = self.state.songlist.len(), "round committed");
    }
}
