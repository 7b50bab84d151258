//! In-process cluster scenarios.
//!
//! Rooms are wired to each other through channel-backed links instead
//! of TCP, and some endpoints (the master driver, a doomed coordinator)
//! are scripted by the test so that failures land at exact points in a
//! round.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use songlist::prelude::*;

const BEAT: Duration = Duration::from_millis(25);
const ALIVE: Duration = Duration::from_millis(120);
/// Startup delay of the replica expected to become coordinator
const STARTUP: Duration = Duration::from_millis(150);
/// Startup delay far enough out that the replica never self-promotes
const NEVER: Duration = Duration::from_secs(60);

/// A cluster of real rooms plus scripted endpoints, fully connected
/// with channel links.
struct Cluster {
    mailboxes: HashMap<String, mpsc::Sender<RoomMsg>>,
    handles: HashMap<String, RoomHandle>,
    /// `links[(a, b)]` is the link held by `a` for reaching `b`
    links: HashMap<(String, String), PeerLink>,
    /// Inboxes of the scripted endpoints
    taps: HashMap<String, mpsc::UnboundedReceiver<WireMsg>>,
}

impl Cluster {
    async fn build(rooms: &[(&str, Duration)], scripted: &[&str]) -> Cluster {
        let mut mailboxes = HashMap::new();
        let mut handles = HashMap::new();
        for (id, startup_delay) in rooms {
            let handle = Room::spawn(RoomConfig {
                self_id: id.to_string(),
                beatrate: BEAT,
                alive_threshold: ALIVE,
                startup_delay: *startup_delay,
            })
            .unwrap();
            mailboxes.insert(id.to_string(), handle.sender());
            handles.insert(id.to_string(), handle);
        }

        let mut tap_txs = HashMap::new();
        let mut taps = HashMap::new();
        for id in scripted {
            let (tx, rx) = mpsc::unbounded_channel();
            tap_txs.insert(id.to_string(), tx);
            taps.insert(id.to_string(), rx);
        }

        let everyone: Vec<String> = rooms
            .iter()
            .map(|(id, _)| id.to_string())
            .chain(scripted.iter().map(|id| id.to_string()))
            .collect();

        let mut links = HashMap::new();
        let mut pending = Vec::new();
        for a in &everyone {
            for b in &everyone {
                if a == b {
                    continue;
                }
                let (link, rx) = PeerLink::channel(b.clone());
                links.insert((a.clone(), b.clone()), link);
                pending.push((a.clone(), b.clone(), rx));
            }
        }

        // every message sent by `a` over its link to `b` shows up at `b`
        // attributed to `b`'s link back to `a`
        for (a, b, mut rx) in pending {
            if let Some(mailbox) = mailboxes.get(&b) {
                let mailbox = mailbox.clone();
                let from = links[&(b.clone(), a.clone())].clone();
                tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        let delivery = RoomMsg::Line {
                            from: from.clone(),
                            msg,
                        };
                        if mailbox.send(delivery).await.is_err() {
                            break;
                        }
                    }
                });
            } else {
                let tap = tap_txs[&b].clone();
                tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        if tap.send(msg).is_err() {
                            break;
                        }
                    }
                });
            }
        }

        Cluster {
            mailboxes,
            handles,
            links,
            taps,
        }
    }

    fn link(&self, holder: &str, target: &str) -> PeerLink {
        self.links[&(holder.to_string(), target.to_string())].clone()
    }

    async fn join_peer(&self, room: &str, peer: &str) {
        self.mailboxes[room]
            .send(RoomMsg::PeerJoined(self.link(room, peer)))
            .await
            .unwrap();
    }

    /// Register every ordered pair among `ids` with each other
    async fn join_all(&self, ids: &[&str]) {
        for a in ids {
            for b in ids {
                if a != b {
                    self.join_peer(a, b).await;
                }
            }
        }
    }

    async fn join_master(&self, room: &str) {
        self.mailboxes[room]
            .send(RoomMsg::MasterJoined(self.link(room, MASTER_ID)))
            .await
            .unwrap();
    }

    /// Deliver one message to a room as if a scripted endpoint sent it
    async fn inject(&self, from: &str, to: &str, msg: WireMsg) {
        self.mailboxes[to]
            .send(RoomMsg::Line {
                from: self.link(to, from),
                msg,
            })
            .await
            .unwrap();
    }

    async fn status(&self, room: &str) -> RoomStatus {
        self.handles[room].status().await.unwrap()
    }

    /// Everything a scripted endpoint has received so far
    fn drain_tap(&mut self, endpoint: &str) -> Vec<WireMsg> {
        let rx = self.taps.get_mut(endpoint).unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Heartbeat from a scripted endpoint until the handle is aborted
    fn spawn_beats(&self, from: &str, role: Role, targets: &[&str]) -> JoinHandle<()> {
        let feeds: Vec<(mpsc::Sender<RoomMsg>, PeerLink)> = targets
            .iter()
            .map(|t| (self.mailboxes[*t].clone(), self.link(t, from)))
            .collect();
        let beat = WireMsg::Heartbeat {
            role,
            id: from.to_string(),
        };
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BEAT);
            loop {
                ticker.tick().await;
                for (mailbox, link) in &feeds {
                    let delivery = RoomMsg::Line {
                        from: link.clone(),
                        msg: beat.clone(),
                    };
                    let _ = mailbox.send(delivery).await;
                }
            }
        })
    }
}

fn count(msgs: &[WireMsg], wanted: &WireMsg) -> usize {
    msgs.iter().filter(|m| *m == wanted).count()
}

#[tokio::test]
async fn lone_coordinator_commits() {
    let mut cluster = Cluster::build(&[("0", STARTUP)], &["master"]).await;
    cluster.join_master("0").await;

    sleep(Duration::from_millis(300)).await;

    let announcements = cluster.drain_tap("master");
    assert_eq!(
        count(
            &announcements,
            &WireMsg::Heartbeat {
                role: Role::Coordinator,
                id: "0".into()
            }
        ),
        1,
        "master should learn who coordinates: {announcements:?}"
    );

    cluster
        .inject(
            "master",
            "0",
            WireMsg::Add {
                name: "a".into(),
                url: "short".into(),
            },
        )
        .await;

    // the round closes at the vote timeout since nobody else is alive
    sleep(Duration::from_millis(400)).await;

    let status = cluster.status("0").await;
    assert_eq!(status.phase, "CoordCommitted");
    assert_eq!(status.commit_iter, 2);
    assert_eq!(status.songlist.get("a").map(String::as_str), Some("short"));

    let acks = cluster.drain_tap("master");
    assert_eq!(count(&acks, &WireMsg::AckCommit), 1);
}

#[tokio::test]
async fn lone_coordinator_rejects_long_url_silently() {
    let mut cluster = Cluster::build(&[("0", STARTUP)], &["master"]).await;
    cluster.join_master("0").await;
    sleep(Duration::from_millis(300)).await;

    // 10 characters against a tolerance of 0 + 5
    cluster
        .inject(
            "master",
            "0",
            WireMsg::Add {
                name: "a".into(),
                url: "toolongurl".into(),
            },
        )
        .await;

    sleep(Duration::from_millis(300)).await;

    let status = cluster.status("0").await;
    assert_eq!(status.phase, "CoordAborted");
    assert_eq!(status.commit_iter, 2);
    assert!(status.songlist.is_empty());

    // the coordinator's own rejection notifies nobody
    let msgs = cluster.drain_tap("master");
    assert_eq!(count(&msgs, &WireMsg::AckCommit), 0);
    assert_eq!(count(&msgs, &WireMsg::AckAbort), 0);
}

#[tokio::test]
async fn delete_of_missing_song_commits_clean() {
    let mut cluster = Cluster::build(&[("0", STARTUP)], &["master"]).await;
    cluster.join_master("0").await;
    sleep(Duration::from_millis(300)).await;

    cluster
        .inject(
            "master",
            "0",
            WireMsg::Delete {
                name: "ghost".into(),
            },
        )
        .await;
    sleep(Duration::from_millis(400)).await;

    let status = cluster.status("0").await;
    assert_eq!(status.phase, "CoordCommitted");
    assert!(status.songlist.is_empty());
    assert_eq!(count(&cluster.drain_tap("master"), &WireMsg::AckCommit), 1);
}

#[tokio::test]
async fn two_replicas_commit_update() {
    let mut cluster = Cluster::build(&[("0", STARTUP), ("1", NEVER)], &["master"]).await;
    cluster.join_master("0").await;

    // replica 0 bootstraps alone, then 1 joins and sees its heartbeats
    sleep(Duration::from_millis(250)).await;
    cluster.join_all(&["0", "1"]).await;
    sleep(Duration::from_millis(150)).await;

    cluster
        .inject(
            "master",
            "0",
            WireMsg::Add {
                name: "x".into(),
                url: "ok".into(),
            },
        )
        .await;
    sleep(Duration::from_millis(250)).await;

    let coord = cluster.status("0").await;
    let part = cluster.status("1").await;
    assert_eq!(coord.phase, "CoordCommitted");
    assert_eq!(part.phase, "ParticipantCommitted");
    assert_eq!(coord.songlist, part.songlist);
    assert_eq!(coord.songlist.get("x").map(String::as_str), Some("ok"));
    // a decided participant steps out of the voting set
    assert_eq!(part.role, Role::Observer);

    let acks = cluster.drain_tap("master");
    assert_eq!(count(&acks, &WireMsg::AckCommit), 1);
    assert_eq!(count(&acks, &WireMsg::AckAbort), 0);
}

#[tokio::test]
async fn rejected_vote_aborts_round() {
    // coordinator 2 tolerates the 7-character URL, participant 1 does
    // not, participant 9 votes yes and must still learn about the abort
    let mut cluster =
        Cluster::build(&[("2", STARTUP), ("1", NEVER), ("9", NEVER)], &["master"]).await;
    cluster.join_master("2").await;

    sleep(Duration::from_millis(250)).await;
    cluster.join_all(&["2", "1", "9"]).await;
    sleep(Duration::from_millis(150)).await;

    cluster
        .inject(
            "master",
            "2",
            WireMsg::Add {
                name: "y".into(),
                url: "0123456".into(),
            },
        )
        .await;
    sleep(Duration::from_millis(300)).await;

    assert_eq!(cluster.status("2").await.phase, "CoordAborted");
    assert_eq!(cluster.status("1").await.phase, "ParticipantAborted");
    assert_eq!(cluster.status("9").await.phase, "ParticipantAborted");
    for id in ["2", "1", "9"] {
        assert!(cluster.status(id).await.songlist.is_empty());
        assert_eq!(cluster.status(id).await.role, Role::Observer);
    }

    let acks = cluster.drain_tap("master");
    assert_eq!(count(&acks, &WireMsg::AckAbort), 1);
    assert_eq!(count(&acks, &WireMsg::AckCommit), 0);
}

#[tokio::test]
async fn survivors_commit_after_coordinator_dies() {
    // scripted coordinator 0 walks both survivors to the committable
    // state and dies before sending the commit
    let mut cluster = Cluster::build(&[("1", NEVER), ("2", NEVER)], &["0"]).await;
    cluster.join_all(&["1", "2"]).await;

    let beats = cluster.spawn_beats("0", Role::Coordinator, &["1", "2"]);
    sleep(Duration::from_millis(150)).await;

    let update = Update::Add {
        name: "x".into(),
        url: "ok".into(),
    };
    cluster
        .inject("0", "1", WireMsg::VoteReq(update.clone()))
        .await;
    cluster.inject("0", "2", WireMsg::VoteReq(update)).await;
    sleep(Duration::from_millis(50)).await;

    let votes = cluster.drain_tap("0");
    assert_eq!(count(&votes, &WireMsg::VoteReply(Vote::Yes)), 2);

    // the coordinator's heart stops now; the precommits were already on
    // the wire
    beats.abort();
    sleep(Duration::from_millis(50)).await;
    cluster.inject("0", "1", WireMsg::PreCommit).await;
    cluster.inject("0", "2", WireMsg::PreCommit).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(cluster.status("1").await.phase, "ParticipantCommitable");
    assert_eq!(cluster.status("2").await.phase, "ParticipantCommitable");
    let acks = cluster.drain_tap("0");
    assert_eq!(count(&acks, &WireMsg::AckPreCommit), 2);

    // commit timeout -> election -> all-committable termination commit
    sleep(Duration::from_millis(600)).await;

    let one = cluster.status("1").await;
    let two = cluster.status("2").await;
    assert_eq!(one.phase, "CoordCommitted");
    assert_eq!(one.role, Role::Coordinator);
    assert_eq!(one.coordinator.as_deref(), Some("1"));
    assert_eq!(two.phase, "ParticipantCommitted");
    assert_eq!(two.coordinator.as_deref(), Some("1"));
    assert_eq!(one.songlist, two.songlist);
    assert_eq!(one.songlist.get("x").map(String::as_str), Some("ok"));
}

#[tokio::test]
async fn lowest_id_wins_election_and_reruns_precommit() {
    // coordinator 1 dies right after collecting votes; 2 must win the
    // election over 4 and walk the uncertain survivors through a fresh
    // precommit round
    let mut cluster = Cluster::build(&[("2", NEVER), ("4", NEVER)], &["1"]).await;
    cluster.join_all(&["2", "4"]).await;

    let beats = cluster.spawn_beats("1", Role::Coordinator, &["2", "4"]);
    sleep(Duration::from_millis(150)).await;
    beats.abort();
    sleep(Duration::from_millis(30)).await;

    let update = Update::Add {
        name: "z".into(),
        url: "tune".into(),
    };
    cluster
        .inject("1", "2", WireMsg::VoteReq(update.clone()))
        .await;
    cluster.inject("1", "4", WireMsg::VoteReq(update)).await;
    sleep(Duration::from_millis(50)).await;

    let votes = cluster.drain_tap("1");
    assert_eq!(count(&votes, &WireMsg::VoteReply(Vote::Yes)), 2);
    assert_eq!(cluster.status("2").await.phase, "ParticipantInitCommit");
    assert_eq!(cluster.status("4").await.phase, "ParticipantInitCommit");

    // precommit timeout -> election -> uncertain survivors -> rerun
    sleep(Duration::from_millis(700)).await;

    let two = cluster.status("2").await;
    let four = cluster.status("4").await;
    assert_eq!(two.role, Role::Coordinator);
    assert_eq!(two.coordinator.as_deref(), Some("2"));
    assert_eq!(two.phase, "CoordCommitted");
    assert_eq!(four.coordinator.as_deref(), Some("2"));
    assert_eq!(four.phase, "ParticipantCommitted");
    assert_eq!(two.songlist, four.songlist);
    assert_eq!(two.songlist.get("z").map(String::as_str), Some("tune"));
}

#[tokio::test]
async fn late_joiner_has_no_say_in_round_recovery() {
    // replicas 5 and 9 precommit a round under scripted coordinator 0;
    // replica 1 - a lower id that was never part of the round - shows
    // up alive before the survivors time out. Recovery must elect 5
    // and commit, not let the bystander win or abort the round.
    let mut cluster = Cluster::build(&[("1", NEVER), ("5", NEVER), ("9", NEVER)], &["0"]).await;
    cluster.join_all(&["5", "9"]).await;

    let beats = cluster.spawn_beats("0", Role::Coordinator, &["5", "9"]);
    sleep(Duration::from_millis(150)).await;

    let update = Update::Add {
        name: "x".into(),
        url: "ok".into(),
    };
    cluster
        .inject("0", "5", WireMsg::VoteReq(update.clone()))
        .await;
    cluster.inject("0", "9", WireMsg::VoteReq(update)).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        count(&cluster.drain_tap("0"), &WireMsg::VoteReply(Vote::Yes)),
        2
    );

    beats.abort();
    sleep(Duration::from_millis(50)).await;
    cluster.inject("0", "5", WireMsg::PreCommit).await;
    cluster.inject("0", "9", WireMsg::PreCommit).await;
    sleep(Duration::from_millis(30)).await;

    // the bystander starts heartbeating as a participant now, after
    // the round's up-sets were snapshotted
    for (a, b) in [("5", "1"), ("1", "5"), ("9", "1"), ("1", "9")] {
        cluster.join_peer(a, b).await;
    }

    sleep(Duration::from_millis(600)).await;

    let five = cluster.status("5").await;
    let nine = cluster.status("9").await;
    let one = cluster.status("1").await;
    assert_eq!(five.phase, "CoordCommitted");
    assert_eq!(five.role, Role::Coordinator);
    assert_eq!(nine.phase, "ParticipantCommitted");
    assert_eq!(five.songlist.get("x").map(String::as_str), Some("ok"));
    assert_eq!(nine.songlist, five.songlist);
    // the round never touched the late joiner
    assert_eq!(one.phase, "Start");
    assert_eq!(one.commit_iter, 1);
    assert!(one.songlist.is_empty());
}

#[tokio::test]
async fn full_state_transfer_installs_songlist() {
    let mut cluster = Cluster::build(&[("0", STARTUP), ("1", NEVER)], &["master"]).await;
    cluster.join_master("0").await;
    sleep(Duration::from_millis(300)).await;

    cluster
        .inject(
            "master",
            "0",
            WireMsg::Add {
                name: "a".into(),
                url: "x".into(),
            },
        )
        .await;
    sleep(Duration::from_millis(400)).await;
    assert_eq!(count(&cluster.drain_tap("master"), &WireMsg::AckCommit), 1);

    // a late joiner pulls the list from whoever is alive
    cluster.join_all(&["0", "1"]).await;
    sleep(Duration::from_millis(150)).await;
    assert!(cluster.status("1").await.songlist.is_empty());

    cluster.inject("master", "1", WireMsg::RequestFullState).await;
    sleep(Duration::from_millis(100)).await;

    let zero = cluster.status("0").await;
    let one = cluster.status("1").await;
    assert_eq!(one.songlist, zero.songlist);
    assert_eq!(one.songlist.get("a").map(String::as_str), Some("x"));
}
