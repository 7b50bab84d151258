//! Election & Termination
//!
//! When a waiting participant loses its coordinator, the surviving
//! round member with the lowest numeric id takes over and recovers the
//! round by querying the other members' commit states. Replicas that
//! joined after the round opened have no say in it.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use tracing::{debug, info, trace, warn};

use super::actor::{Room, Termination, TimeoutMsg};
use super::protocol::WireMsg;
use crate::net::PeerLink;
use crate::state::{CommitPhase, CommitState, Decision, Role, UpSet, Update};

impl Room {
    /// Lowest live id among the round's surviving participants (self
    /// included) wins
    pub(super) fn run_election(&mut self) {
        let up_set = self.round_up_set().cloned();

        let mut candidates: Vec<(u64, String, Option<PeerLink>)> =
            vec![(self.self_num, self.cfg.self_id.clone(), None)];

        for (id, entry) in self.state.beatmap.alive(Some(Role::Participant)) {
            // a replica that was not in the round when it opened cannot
            // take it over
            if let Some(up_set) = &up_set {
                if !up_set.contains_key(&id) {
                    continue;
                }
            }
            match id.parse::<u64>() {
                Ok(num) => candidates.push((num, id, Some(entry.link))),
                Err(_) => warn!(peer = %id, "non-numeric id cannot stand for election"),
            }
        }

        let Some((_, winner_id, winner_link)) =
            candidates.into_iter().min_by_key(|(num, _, _)| *num)
        else {
            return;
        };

        if winner_id == self.cfg.self_id {
            self.become_termination_coordinator();
        } else {
            info!(winner = %winner_id, "adopting election winner as coordinator");
            if let Some(link) = winner_link {
                self.state.coordinator = Some(link);
            }
            self.schedule(TimeoutMsg::StateReq {
                source_iter: self.state.commit_iter,
            });
        }
    }

    /// The up-set snapshot of the round this replica is waiting in
    fn round_up_set(&self) -> Option<&UpSet> {
        match &self.state.phase {
            CommitPhase::ParticipantInitCommit { up_set, .. }
            | CommitPhase::ParticipantCommitable { up_set, .. } => Some(up_set),
            _ => None,
        }
    }

    /// Query the round's other members for their state and decide once
    /// the replies are in (or stop arriving)
    fn become_termination_coordinator(&mut self) {
        info!("won election, recovering round as coordinator");

        // the up-set carried in our own phase is the round's membership;
        // only when we hold no round ourselves is the query widened to
        // whoever is alive
        let queried = match self.round_up_set() {
            Some(up_set) => up_set.clone(),
            None => self.alive_participants(),
        };
        for link in queried.values() {
            link.send(WireMsg::StateReq);
        }
        self.schedule(TimeoutMsg::StateReqReply {
            source_iter: self.state.commit_iter,
        });
        self.state.termination = Some(Termination {
            queried,
            replies: BTreeMap::new(),
        });

        self.state.coordinator = Some(self.self_link.clone());
        self.state.role = Role::Coordinator;
        self.restart_beats();
        self.notify_master(WireMsg::Heartbeat {
            role: Role::Coordinator,
            id: self.cfg.self_id.clone(),
        });
    }

    pub(super) fn handle_state_req(&self, from: PeerLink) {
        match self.state.phase.commit_state() {
            Some(state) => {
                debug!(to = %from.id(), %state, "answering state request");
                from.send(WireMsg::State(state));
            }
            // never saw the round's vote request; staying silent beats
            // passing for a real abort
            None => debug!(to = %from.id(), "no round state to report"),
        }
    }

    pub(super) fn handle_state_reply(&mut self, from: PeerLink, state: CommitState) {
        match &mut self.state.termination {
            Some(termination) => {
                termination.replies.insert(from.id().to_string(), state);
            }
            None => {
                warn!(from = %from.id(), "state reply with no termination query outstanding");
            }
        }
    }

    /// Non-winner watchdog: if the replica we expect to take over never
    /// shows a pulse, the election runs again.
    pub(super) fn handle_state_req_timeout(&mut self) {
        if self.coordinator_alive() {
            trace!("expected coordinator is alive, keep waiting");
        } else {
            info!("expected coordinator did not take over, re-running election");
            self.run_election();
        }
    }

    /// The termination decision, over the states reported by the
    /// round's survivors plus our own when we were in it: any commit
    /// wins, then any abort, then an all-committable commit;
    /// uncertainty reruns the last two phases.
    pub(super) fn handle_state_req_reply_timeout(&mut self) {
        let Some(termination) = self.state.termination.take() else {
            trace!("state-reply timeout with no termination outstanding");
            return;
        };

        let mut states: Vec<CommitState> = termination.replies.values().copied().collect();
        // our own state counts only if we were in the round ourselves
        if let Some(own) = self.state.phase.commit_state() {
            states.push(own);
        }

        if states.is_empty() {
            info!("no survivor reported a round, taking over idle");
            if matches!(self.state.phase, CommitPhase::Start) {
                self.state.phase = CommitPhase::CoordWaiting;
            }
            return;
        }

        let update = self.take_round_update();
        let decision = if states.contains(&CommitState::Committed) {
            Some(Decision::Commit)
        } else if states.contains(&CommitState::Aborted) {
            Some(Decision::Abort)
        } else if states.iter().all(|s| *s == CommitState::Committable) {
            Some(Decision::Commit)
        } else {
            // some survivor is uncertain: precommit again, then commit
            None
        };
        debug!(?states, ?decision, "deciding recovered round");

        match decision {
            Some(Decision::Commit) => self.terminate_commit(update, &termination.queried),
            Some(Decision::Abort) => self.terminate_abort(&termination.queried),
            None => {
                let Some(update) = update else {
                    warn!("uncertain survivors but no update to rerun, dropping round");
                    return;
                };
                info!("uncertain survivors, rerunning precommit");
                for link in termination.queried.values() {
                    link.send(WireMsg::PreCommit);
                }
                self.schedule(TimeoutMsg::AckPreCommit {
                    source_iter: self.state.commit_iter,
                });
                self.state.phase = CommitPhase::CoordCommitable {
                    update,
                    up_set: termination.queried,
                    acks: BTreeSet::new(),
                };
            }
        }
    }

    /// Pull the in-flight update out of the current phase, if any
    fn take_round_update(&mut self) -> Option<Update> {
        let phase = mem::replace(&mut self.state.phase, CommitPhase::Start);
        match phase {
            CommitPhase::ParticipantInitCommit { update, .. }
            | CommitPhase::ParticipantCommitable { update, .. }
            | CommitPhase::CoordInitCommit { update, .. }
            | CommitPhase::CoordCommitable { update, .. } => Some(update),
            other => {
                self.state.phase = other;
                None
            }
        }
    }

    fn terminate_commit(&mut self, update: Option<Update>, queried: &UpSet) {
        for link in queried.values() {
            link.send(WireMsg::Commit);
        }
        match update {
            Some(update) => self.commit_round(update),
            None => {
                warn!("commit decided with no local update to apply");
                self.notify_master(WireMsg::AckCommit);
                self.state.commit_iter += 1;
                self.state.phase = CommitPhase::CoordCommitted;
            }
        }
    }

    fn terminate_abort(&mut self, queried: &UpSet) {
        info!("termination decided abort");
        for link in queried.values() {
            link.send(WireMsg::Abort);
        }
        self.notify_master(WireMsg::AckAbort);
        self.state.commit_iter += 1;
        self.state.phase = CommitPhase::CoordAborted;
        self.announce_observer();
    }
}
