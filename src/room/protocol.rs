//! Wire Protocol
//!
//! Every message on the wire is one UTF-8 text line of space-separated
//! tokens. Heartbeats are `<role> <id>`; song names and URLs are single
//! tokens; the full song list travels as one compact JSON object.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::state::{CommitState, Role, Update, Vote};

/// Protocol messages exchanged between replicas and with the master
#[derive(Debug, Clone, PartialEq)]
pub enum WireMsg {
    // ========== Transport handshake ==========
    /// First line of a replica connection
    Join { id: String },
    /// First line of a driver connection
    JoinMaster,

    // ========== Liveness ==========
    /// Periodic role announcement: `<role> <id>`
    Heartbeat { role: Role, id: String },

    // ========== Commit rounds ==========
    /// Coordinator opens a round
    VoteReq(Update),
    /// Participant answers a vote request
    VoteReply(Vote),
    /// Coordinator saw unanimous yes votes
    PreCommit,
    /// Participant acknowledges the precommit
    AckPreCommit,
    /// Final decisions
    Commit,
    Abort,

    // ========== Termination protocol ==========
    /// New coordinator queries a survivor's round state
    StateReq,
    /// Survivor's answer
    State(CommitState),

    // ========== State transfer ==========
    /// Ask a peer for its full song list
    FullStateReq,
    /// Full song list payload
    Songlist(BTreeMap<String, String>),

    // ========== Master requests ==========
    Add { name: String, url: String },
    Delete { name: String },
    Get { name: String },
    RequestFullState,

    // ========== Master responses ==========
    AckCommit,
    AckAbort,
    /// Lookup result; `None` prints as `resp NONE`
    Resp { url: Option<String> },
}

impl WireMsg {
    /// Parse one wire line
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let head = parts
            .next()
            .ok_or_else(|| Error::Protocol("empty line".into()))?;

        let msg = match head {
            "join" => WireMsg::Join {
                id: required(parts.next(), "join id")?,
            },
            "joinmaster" => WireMsg::JoinMaster,
            "coordinator" | "participant" | "observer" => WireMsg::Heartbeat {
                role: head.parse()?,
                id: required(parts.next(), "heartbeat id")?,
            },
            "votereq" => match parts.next() {
                Some("add") => WireMsg::VoteReq(Update::Add {
                    name: required(parts.next(), "votereq add name")?,
                    url: required(parts.next(), "votereq add url")?,
                }),
                Some("delete") => WireMsg::VoteReq(Update::Delete {
                    name: required(parts.next(), "votereq delete name")?,
                }),
                other => {
                    return Err(Error::Protocol(format!(
                        "unknown vote request kind {other:?}"
                    )))
                }
            },
            "votereply" => match parts.next() {
                Some("yes") => WireMsg::VoteReply(Vote::Yes),
                Some("no") => WireMsg::VoteReply(Vote::No),
                other => return Err(Error::Protocol(format!("unknown vote {other:?}"))),
            },
            "precommit" => WireMsg::PreCommit,
            "ackprecommit" => WireMsg::AckPreCommit,
            "commit" => WireMsg::Commit,
            "abort" => WireMsg::Abort,
            "statereq" => WireMsg::StateReq,
            "state" => WireMsg::State(required(parts.next(), "commit state")?.parse()?),
            "fullstatereq" => WireMsg::FullStateReq,
            "songlist" => {
                let payload = line
                    .split_once(' ')
                    .map(|(_, rest)| rest.trim())
                    .unwrap_or("");
                WireMsg::Songlist(serde_json::from_str(payload)?)
            }
            "add" => WireMsg::Add {
                name: required(parts.next(), "add name")?,
                url: required(parts.next(), "add url")?,
            },
            "delete" => WireMsg::Delete {
                name: required(parts.next(), "delete name")?,
            },
            "get" => WireMsg::Get {
                name: required(parts.next(), "get name")?,
            },
            "requestfullstate" => WireMsg::RequestFullState,
            "ack" => match parts.next() {
                Some("commit") => WireMsg::AckCommit,
                Some("abort") => WireMsg::AckAbort,
                other => return Err(Error::Protocol(format!("unknown ack {other:?}"))),
            },
            "resp" => {
                let url = required(parts.next(), "resp url")?;
                WireMsg::Resp {
                    url: (url != "NONE").then_some(url),
                }
            }
            other => return Err(Error::Protocol(format!("unknown message {other:?}"))),
        };

        Ok(msg)
    }

    /// Encode as one wire line
    pub fn encode(&self) -> Result<String> {
        let line = match self {
            WireMsg::Join { id } => format!("join {id}"),
            WireMsg::JoinMaster => "joinmaster".into(),
            WireMsg::Heartbeat { role, id } => format!("{role} {id}"),
            WireMsg::VoteReq(update) => format!("votereq {update}"),
            WireMsg::VoteReply(Vote::Yes) => "votereply yes".into(),
            WireMsg::VoteReply(Vote::No) => "votereply no".into(),
            WireMsg::PreCommit => "precommit".into(),
            WireMsg::AckPreCommit => "ackprecommit".into(),
            WireMsg::Commit => "commit".into(),
            WireMsg::Abort => "abort".into(),
            WireMsg::StateReq => "statereq".into(),
            WireMsg::State(state) => format!("state {state}"),
            WireMsg::FullStateReq => "fullstatereq".into(),
            WireMsg::Songlist(songs) => format!("songlist {}", serde_json::to_string(songs)?),
            WireMsg::Add { name, url } => format!("add {name} {url}"),
            WireMsg::Delete { name } => format!("delete {name}"),
            WireMsg::Get { name } => format!("get {name}"),
            WireMsg::RequestFullState => "requestfullstate".into(),
            WireMsg::AckCommit => "ack commit".into(),
            WireMsg::AckAbort => "ack abort".into(),
            WireMsg::Resp { url } => format!("resp {}", url.as_deref().unwrap_or("NONE")),
        };

        Ok(line)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMsg::Join { .. } => "Join",
            WireMsg::JoinMaster => "JoinMaster",
            WireMsg::Heartbeat { .. } => "Heartbeat",
            WireMsg::VoteReq(_) => "VoteReq",
            WireMsg::VoteReply(_) => "VoteReply",
            WireMsg::PreCommit => "PreCommit",
            WireMsg::AckPreCommit => "AckPreCommit",
            WireMsg::Commit => "Commit",
            WireMsg::Abort => "Abort",
            WireMsg::StateReq => "StateReq",
            WireMsg::State(_) => "State",
            WireMsg::FullStateReq => "FullStateReq",
            WireMsg::Songlist(_) => "Songlist",
            WireMsg::Add { .. } => "Add",
            WireMsg::Delete { .. } => "Delete",
            WireMsg::Get { .. } => "Get",
            WireMsg::RequestFullState => "RequestFullState",
            WireMsg::AckCommit => "AckCommit",
            WireMsg::AckAbort => "AckAbort",
            WireMsg::Resp { .. } => "Resp",
        }
    }
}

fn required(token: Option<&str>, what: &str) -> Result<String> {
    token
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol(format!("missing {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heartbeat() {
        let msg = WireMsg::parse("participant 2").unwrap();
        assert_eq!(
            msg,
            WireMsg::Heartbeat {
                role: Role::Participant,
                id: "2".into()
            }
        );
        assert_eq!(msg.encode().unwrap(), "participant 2");
    }

    #[test]
    fn test_parse_vote_request() {
        assert_eq!(
            WireMsg::parse("votereq add thunderstruck http://x/1").unwrap(),
            WireMsg::VoteReq(Update::Add {
                name: "thunderstruck".into(),
                url: "http://x/1".into()
            })
        );
        assert_eq!(
            WireMsg::parse("votereq delete thunderstruck").unwrap(),
            WireMsg::VoteReq(Update::Delete {
                name: "thunderstruck".into()
            })
        );
    }

    #[test]
    fn test_commit_and_ack_lines_disambiguate() {
        assert_eq!(WireMsg::parse("commit").unwrap(), WireMsg::Commit);
        assert_eq!(WireMsg::parse("ack commit").unwrap(), WireMsg::AckCommit);
        assert_eq!(WireMsg::parse("ack abort").unwrap(), WireMsg::AckAbort);
    }

    #[test]
    fn test_resp_none() {
        assert_eq!(
            WireMsg::parse("resp NONE").unwrap(),
            WireMsg::Resp { url: None }
        );
        assert_eq!(
            WireMsg::Resp { url: None }.encode().unwrap(),
            "resp NONE"
        );
    }

    #[test]
    fn test_songlist_payload() {
        let mut songs = BTreeMap::new();
        songs.insert("a".to_string(), "http://x/a".to_string());

        let line = WireMsg::Songlist(songs.clone()).encode().unwrap();
        assert!(line.starts_with("songlist "));
        assert_eq!(WireMsg::parse(&line).unwrap(), WireMsg::Songlist(songs));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(WireMsg::parse("").is_err());
        assert!(WireMsg::parse("warble").is_err());
        assert!(WireMsg::parse("votereq add onlyname").is_err());
        assert!(WireMsg::parse("votereply maybe").is_err());
        assert!(WireMsg::parse("state confused").is_err());
    }
}
