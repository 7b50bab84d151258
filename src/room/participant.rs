//! Participant Handlers
//!
//! The voting side of a commit round: answering vote requests, acking
//! the precommit, applying decisions, and escalating to an election
//! when the coordinator goes quiet.

use std::mem;

use tracing::{debug, info, trace, warn};

use super::actor::{Room, TimeoutMsg};
use super::protocol::WireMsg;
use crate::error::{Error, Result};
use crate::net::PeerLink;
use crate::state::{CommitPhase, Update, Vote};

impl Room {
    /// A vote request makes this replica a participant in the round.
    /// Receiving one with no known coordinator means the replica cannot
    /// meaningfully proceed.
    pub(super) fn handle_vote_req(&mut self, from: PeerLink, update: Update) -> Result<()> {
        if self
            .state
            .coordinator
            .as_ref()
            .is_some_and(|c| c.id() == self.cfg.self_id)
        {
            warn!(from = %from.id(), "vote request received while coordinating, ignoring");
            return Ok(());
        }

        let coordinator = self.state.coordinator.clone().ok_or(Error::NoCoordinator)?;

        let vote = update.vote(self.self_num);
        coordinator.send(WireMsg::VoteReply(vote));

        match vote {
            Vote::Yes => {
                debug!(%update, "voted yes, waiting for precommit");
                let up_set = self.alive_participants();
                self.schedule(TimeoutMsg::PreCommit {
                    source_iter: self.state.commit_iter,
                });
                self.state.phase = CommitPhase::ParticipantInitCommit { update, up_set };
            }
            Vote::No => {
                info!(%update, "voted no, stepping out as observer");
                self.state.commit_iter += 1;
                self.state.phase = CommitPhase::ParticipantAborted;
                self.announce_observer();
            }
        }

        Ok(())
    }

    /// The precommit is acknowledged to whichever coordinator sent it;
    /// during termination the round's second run comes from the newly
    /// elected one.
    pub(super) fn handle_precommit(&mut self, from: PeerLink) {
        let phase = mem::replace(&mut self.state.phase, CommitPhase::Start);
        match phase {
            CommitPhase::ParticipantInitCommit { update, up_set }
            | CommitPhase::ParticipantCommitable { update, up_set } => {
                from.send(WireMsg::AckPreCommit);
                self.schedule(TimeoutMsg::Commit {
                    source_iter: self.state.commit_iter,
                });
                self.state.phase = CommitPhase::ParticipantCommitable { update, up_set };
            }
            other => {
                warn!(
                    from = %from.id(),
                    phase = other.name(),
                    "precommit outside a yes-voted round, ignoring"
                );
                self.state.phase = other;
            }
        }
    }

    /// A commit decision also reaches uncertain participants when the
    /// termination protocol learns some survivor already committed.
    pub(super) fn handle_decision_commit(&mut self) {
        let phase = mem::replace(&mut self.state.phase, CommitPhase::Start);
        match phase {
            CommitPhase::ParticipantCommitable { update, .. }
            | CommitPhase::ParticipantInitCommit { update, .. } => {
                update.apply(&mut self.state.songlist);
                self.state.commit_iter += 1;
                self.state.phase = CommitPhase::ParticipantCommitted;
                self.announce_observer();
                info!(songs = self.state.songlist.len(), "round committed");
            }
            other => {
                warn!(phase = other.name(), "commit decision outside a round, ignoring");
                self.state.phase = other;
            }
        }
    }

    pub(super) fn handle_decision_abort(&mut self) {
        match self.state.phase {
            CommitPhase::CoordAborted | CommitPhase::ParticipantAborted => {
                trace!("abort decision while already aborted");
            }
            CommitPhase::CoordCommitted | CommitPhase::ParticipantCommitted => {
                warn!("abort decision after commit, ignoring");
            }
            CommitPhase::Start
            | CommitPhase::ParticipantInitCommit { .. }
            | CommitPhase::ParticipantCommitable { .. } => {
                info!("round aborted");
                self.state.commit_iter += 1;
                self.state.phase = CommitPhase::ParticipantAborted;
                self.announce_observer();
            }
            _ => {
                warn!(
                    phase = self.state.phase.name(),
                    "abort decision at coordinator, ignoring"
                );
            }
        }
    }

    /// Shared behavior of the precommit and commit waits: if the
    /// coordinator stopped heartbeating, recover through an election.
    pub(super) fn handle_decision_wait_timeout(&mut self) {
        match self.state.phase {
            CommitPhase::ParticipantInitCommit { .. }
            | CommitPhase::ParticipantCommitable { .. } => {
                if self.coordinator_alive() {
                    trace!("coordinator still alive, keep waiting");
                } else {
                    info!("coordinator lost, starting election");
                    self.run_election();
                }
            }
            _ => {
                trace!(
                    phase = self.state.phase.name(),
                    "decision-wait timeout outside a round"
                );
            }
        }
    }
}
