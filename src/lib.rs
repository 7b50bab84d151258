//! Songlist - Replicated Song Catalog
//!
//! A small cluster of replicas agreeing on a shared map from song name
//! to URL using the three-phase commit protocol. An external driver
//! (the "master") submits add/delete/get requests; every non-failed
//! replica either commits each update into its local song list or
//! aborts it, with all replicas reaching the same decision.
//!
//! # Architecture
//!
//! Each replica hosts a single room actor. All input - master requests,
//! peer protocol messages, scheduled timeouts and heartbeats - is
//! serialized through the actor's mailbox, so replica state needs no
//! locking.
//!
//! # Features
//!
//! - Three-phase commit rounds driven by a coordinator replica
//! - Heartbeat-based failure detection with a fixed liveness threshold
//! - Lowest-id election and termination recovery on coordinator loss
//! - Line-based text protocol over TCP
//! - Observer replicas that keep serving reads after stepping out

pub mod config;
pub mod error;
pub mod net;
pub mod room;
pub mod state;

pub use config::SonglistConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SonglistConfig;
    pub use crate::error::{Error, Result};
    pub use crate::net::{PeerLink, MASTER_ID};
    pub use crate::room::protocol::WireMsg;
    pub use crate::room::{Room, RoomConfig, RoomHandle, RoomMsg, RoomStatus};
    pub use crate::state::{CommitPhase, CommitState, Decision, Role, Update, Vote};
}
