//! Room Actor
//!
//! A single task owns all replica state and processes one mailbox
//! message to completion before the next. Handlers never block; every
//! wait is a self-message scheduled for later delivery and tagged with
//! the commit iteration it belongs to.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::protocol::WireMsg;
use super::RoomConfig;
use crate::error::{Error, Result};
use crate::net::PeerLink;
use crate::state::{BeatMap, CommitPhase, CommitState, Role, UpSet};

/// Depth of the room mailbox
const MAILBOX_QUEUE: usize = 256;

/// Everything the room can find in its mailbox
#[derive(Debug)]
pub enum RoomMsg {
    /// A replica link became available (join handshake or redial)
    PeerJoined(PeerLink),
    /// The external driver attached itself
    MasterJoined(PeerLink),
    /// A protocol line from an identified sender
    Line { from: PeerLink, msg: WireMsg },
    /// A scheduled self-message
    Timeout(TimeoutMsg),
    /// Snapshot request
    Query(oneshot::Sender<RoomStatus>),
    /// Stop processing and release the heartbeat tasks
    Shutdown,
}

/// Self-messages delivered by the timeout scheduler.
///
/// Timers are never cancelled; each carries the commit iteration it was
/// scheduled under and is discarded on arrival if the round has moved
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutMsg {
    /// Startup decision whether to self-promote
    DetermineCoordinator,
    /// Coordinator waited long enough for votes
    VoteReply { source_iter: u64 },
    /// Coordinator waited long enough for precommit acks
    AckPreCommit { source_iter: u64 },
    /// Participant waited long enough for the precommit
    PreCommit { source_iter: u64 },
    /// Participant waited long enough for the commit
    Commit { source_iter: u64 },
    /// Non-winner waited long enough for the new coordinator to appear
    StateReq { source_iter: u64 },
    /// New coordinator waited long enough for state replies
    StateReqReply { source_iter: u64 },
}

impl TimeoutMsg {
    fn source_iter(&self) -> Option<u64> {
        match self {
            TimeoutMsg::DetermineCoordinator => None,
            TimeoutMsg::VoteReply { source_iter }
            | TimeoutMsg::AckPreCommit { source_iter }
            | TimeoutMsg::PreCommit { source_iter }
            | TimeoutMsg::Commit { source_iter }
            | TimeoutMsg::StateReq { source_iter }
            | TimeoutMsg::StateReqReply { source_iter } => Some(*source_iter),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TimeoutMsg::DetermineCoordinator => "DetermineCoordinator",
            TimeoutMsg::VoteReply { .. } => "VoteReply",
            TimeoutMsg::AckPreCommit { .. } => "AckPreCommit",
            TimeoutMsg::PreCommit { .. } => "PreCommit",
            TimeoutMsg::Commit { .. } => "Commit",
            TimeoutMsg::StateReq { .. } => "StateReq",
            TimeoutMsg::StateReqReply { .. } => "StateReqReply",
        }
    }
}

/// Point-in-time view of a room, answered over a oneshot channel
#[derive(Debug, Clone)]
pub struct RoomStatus {
    pub id: String,
    pub role: Role,
    pub phase: String,
    pub commit_iter: u64,
    pub coordinator: Option<String>,
    pub songlist: BTreeMap<String, String>,
}

/// Outstanding termination query (new coordinator only)
#[derive(Debug)]
pub(super) struct Termination {
    /// Alive participants the statereq went to
    pub queried: UpSet,
    /// Replies collected so far
    pub replies: BTreeMap<String, CommitState>,
}

/// State owned exclusively by the room task
pub(super) struct RoomState {
    /// Directory of known peer replicas
    pub actors: BTreeMap<String, PeerLink>,
    /// Current coordinator (self link when this replica coordinates)
    pub coordinator: Option<PeerLink>,
    /// The external driver, set on joinmaster
    pub master: Option<PeerLink>,
    /// Failure detector input
    pub beatmap: BeatMap,
    /// Outstanding heartbeat senders, one per peer
    pub beat_tasks: Vec<JoinHandle<()>>,
    /// Role announced in our heartbeats
    pub role: Role,
    /// 3PC sub-state of the current round
    pub phase: CommitPhase,
    /// Monotonic round counter; advanced on every terminal transition
    pub commit_iter: u64,
    /// The replicated map
    pub songlist: BTreeMap<String, String>,
    /// Termination protocol bookkeeping
    pub termination: Option<Termination>,
}

/// A songlist replica
pub struct Room {
    pub(super) cfg: RoomConfig,
    pub(super) self_num: u64,
    pub(super) self_link: PeerLink,
    pub(super) mailbox: mpsc::Sender<RoomMsg>,
    pub(super) state: RoomState,
}

/// Handle to a spawned room
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomMsg>,
}

impl RoomHandle {
    /// Channel into the room's mailbox, for the transport layer
    pub fn sender(&self) -> mpsc::Sender<RoomMsg> {
        self.tx.clone()
    }

    /// Ask the room for a snapshot of its state
    pub async fn status(&self) -> Result<RoomStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomMsg::Query(reply_tx))
            .await
            .map_err(|_| Error::State("room is gone".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::State("room dropped the query".into()))
    }

    /// Stop the room and its heartbeat tasks
    pub async fn shutdown(&self) {
        let _ = self.tx.send(RoomMsg::Shutdown).await;
    }
}

impl Room {
    /// Spawn a room onto the runtime and return its handle
    pub fn spawn(cfg: RoomConfig) -> Result<RoomHandle> {
        let self_num = cfg.self_id.parse::<u64>().map_err(|_| {
            Error::Config(format!(
                "replica id must be a non-negative integer, got {:?}",
                cfg.self_id
            ))
        })?;

        let (tx, rx) = mpsc::channel(MAILBOX_QUEUE);
        let (self_link, self_rx) = PeerLink::channel(cfg.self_id.clone());

        // messages addressed to our own link come right back to the mailbox
        spawn_self_pump(self_link.clone(), self_rx, tx.clone());

        let room = Room {
            state: RoomState {
                actors: BTreeMap::new(),
                coordinator: None,
                master: None,
                beatmap: BeatMap::new(cfg.alive_threshold),
                beat_tasks: Vec::new(),
                role: Role::Participant,
                phase: CommitPhase::Start,
                commit_iter: 1,
                songlist: BTreeMap::new(),
                termination: None,
            },
            self_num,
            self_link,
            mailbox: tx.clone(),
            cfg,
        };

        tokio::spawn(async move {
            if let Err(e) = room.run(rx).await {
                error!("room terminated: {e}");
            }
        });

        Ok(RoomHandle { tx })
    }

    /// Mailbox loop; owns the state until shutdown or a fatal error
    async fn run(mut self, mut rx: mpsc::Receiver<RoomMsg>) -> Result<()> {
        info!(id = %self.cfg.self_id, "room starting");
        self.schedule_in(TimeoutMsg::DetermineCoordinator, self.cfg.startup_delay);

        let result = self.process(&mut rx).await;

        for task in self.state.beat_tasks.drain(..) {
            task.abort();
        }
        info!(id = %self.cfg.self_id, "room stopped");
        result
    }

    async fn process(&mut self, rx: &mut mpsc::Receiver<RoomMsg>) -> Result<()> {
        while let Some(msg) = rx.recv().await {
            match msg {
                RoomMsg::PeerJoined(link) => self.handle_peer_joined(link),
                RoomMsg::MasterJoined(link) => {
                    info!("master joined");
                    self.state.master = Some(link);
                }
                RoomMsg::Line { from, msg } => self.handle_line(from, msg)?,
                RoomMsg::Timeout(timeout) => self.handle_timeout(timeout),
                RoomMsg::Query(reply) => {
                    let _ = reply.send(self.status());
                }
                RoomMsg::Shutdown => break,
            }
        }
        Ok(())
    }

    /// Dispatch one protocol line against the current phase
    fn handle_line(&mut self, from: PeerLink, msg: WireMsg) -> Result<()> {
        trace!(from = %from.id(), msg = msg.type_name(), "received");

        match msg {
            WireMsg::Heartbeat { role, id } => self.handle_heartbeat(id, role, from),
            WireMsg::VoteReq(update) => self.handle_vote_req(from, update)?,
            WireMsg::VoteReply(vote) => self.handle_vote_reply(from, vote),
            WireMsg::PreCommit => self.handle_precommit(from),
            WireMsg::AckPreCommit => self.handle_ack_precommit(from),
            WireMsg::Commit => self.handle_decision_commit(),
            WireMsg::Abort => self.handle_decision_abort(),
            WireMsg::StateReq => self.handle_state_req(from),
            WireMsg::State(state) => self.handle_state_reply(from, state),
            WireMsg::FullStateReq => self.handle_full_state_req(from),
            WireMsg::Songlist(songs) => self.handle_songlist(songs),
            WireMsg::Add { name, url } => self.handle_add(name, url),
            WireMsg::Delete { name } => self.handle_delete(name),
            WireMsg::Get { name } => self.handle_get(from, name),
            WireMsg::RequestFullState => self.handle_request_full_state(),
            other => {
                warn!(from = %from.id(), msg = other.type_name(), "unexpected message");
            }
        }

        Ok(())
    }

    /// Run a timeout, unless the round it was scheduled under is over
    fn handle_timeout(&mut self, timeout: TimeoutMsg) {
        if let Some(source_iter) = timeout.source_iter() {
            if source_iter != self.state.commit_iter {
                trace!(
                    timeout = timeout.name(),
                    source_iter,
                    current = self.state.commit_iter,
                    "discarding stale timeout"
                );
                return;
            }
        }

        match timeout {
            TimeoutMsg::DetermineCoordinator => self.handle_determine_coordinator(),
            TimeoutMsg::VoteReply { .. } => self.handle_vote_reply_timeout(),
            TimeoutMsg::AckPreCommit { .. } => self.handle_ack_precommit_timeout(),
            TimeoutMsg::PreCommit { .. } | TimeoutMsg::Commit { .. } => {
                self.handle_decision_wait_timeout()
            }
            TimeoutMsg::StateReq { .. } => self.handle_state_req_timeout(),
            TimeoutMsg::StateReqReply { .. } => self.handle_state_req_reply_timeout(),
        }
    }

    // ========== Liveness ==========

    fn handle_heartbeat(&mut self, id: String, role: Role, from: PeerLink) {
        if id == self.cfg.self_id {
            return;
        }

        if !self.state.actors.contains_key(&id) {
            debug!(peer = %id, "registering peer learned from heartbeat");
            self.state.actors.insert(id.clone(), from.clone());
            self.restart_beats();
        }

        if role == Role::Coordinator {
            self.state.coordinator = Some(from.clone());
        }
        self.state.beatmap.record(id, role, from);
    }

    fn handle_peer_joined(&mut self, link: PeerLink) {
        info!(peer = %link.id(), "peer joined");
        self.state.actors.insert(link.id().to_string(), link);
        self.restart_beats();
    }

    /// Cancel all heartbeat senders and start fresh ones against the
    /// current directory, announcing the current role. Called on every
    /// role change and whenever a peer joins.
    pub(super) fn restart_beats(&mut self) {
        for task in self.state.beat_tasks.drain(..) {
            task.abort();
        }

        let rate = self.cfg.beatrate;
        for link in self.state.actors.values() {
            let link = link.clone();
            let beat = WireMsg::Heartbeat {
                role: self.state.role,
                id: self.cfg.self_id.clone(),
            };
            self.state.beat_tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(rate);
                loop {
                    ticker.tick().await;
                    link.send(beat.clone());
                }
            }));
        }
    }

    // ========== Timeout scheduler ==========

    /// Deliver `msg` to our own mailbox after the liveness threshold
    pub(super) fn schedule(&self, msg: TimeoutMsg) {
        self.schedule_in(msg, self.cfg.alive_threshold);
    }

    fn schedule_in(&self, msg: TimeoutMsg, delay: Duration) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mailbox.send(RoomMsg::Timeout(msg)).await;
        });
    }

    // ========== Shared helpers ==========

    /// Snapshot of alive participants, keyed by id
    pub(super) fn alive_participants(&self) -> UpSet {
        self.state
            .beatmap
            .alive(Some(Role::Participant))
            .into_iter()
            .map(|(id, entry)| (id, entry.link))
            .collect()
    }

    /// Whether the current coordinator counts as alive. A replica
    /// coordinating itself is trivially alive.
    pub(super) fn coordinator_alive(&self) -> bool {
        match &self.state.coordinator {
            None => false,
            Some(c) if c.id() == self.cfg.self_id => true,
            Some(c) => self.state.beatmap.is_alive(c.id()),
        }
    }

    pub(super) fn notify_master(&self, msg: WireMsg) {
        match &self.state.master {
            Some(master) => master.send(msg),
            None => debug!(msg = msg.type_name(), "no master joined, dropping notification"),
        }
    }

    /// Step out of the voting set and say so in our heartbeats
    pub(super) fn announce_observer(&mut self) {
        self.state.role = Role::Observer;
        self.restart_beats();
    }

    fn status(&self) -> RoomStatus {
        RoomStatus {
            id: self.cfg.self_id.clone(),
            role: self.state.role,
            phase: self.state.phase.name().to_string(),
            commit_iter: self.state.commit_iter,
            coordinator: self
                .state
                .coordinator
                .as_ref()
                .map(|c| c.id().to_string()),
            songlist: self.state.songlist.clone(),
        }
    }

    // ========== Master-facing reads ==========

    fn handle_get(&self, from: PeerLink, name: String) {
        let url = self.state.songlist.get(&name).cloned();
        from.send(WireMsg::Resp { url });
    }

    /// Fetch the song list from any live peer; the reply installs it
    fn handle_request_full_state(&self) {
        match self.state.beatmap.alive(None).into_iter().next() {
            Some((id, entry)) => {
                debug!(peer = %id, "requesting full state");
                entry.link.send(WireMsg::FullStateReq);
            }
            None => warn!("no live peer to fetch the song list from"),
        }
    }

    fn handle_full_state_req(&self, from: PeerLink) {
        from.send(WireMsg::Songlist(self.state.songlist.clone()));
    }

    fn handle_songlist(&mut self, songs: BTreeMap<String, String>) {
        info!(entries = songs.len(), "installing song list from peer");
        self.state.songlist = songs;
    }
}

/// Forward anything sent to our own link back into the mailbox
fn spawn_self_pump(
    self_link: PeerLink,
    mut rx: mpsc::Receiver<WireMsg>,
    mailbox: mpsc::Sender<RoomMsg>,
) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let delivery = RoomMsg::Line {
                from: self_link.clone(),
                msg,
            };
            if mailbox.send(delivery).await.is_err() {
                break;
            }
        }
    });
}
