//! Peer Links
//!
//! Capability handles for reaching peers and the master driver. A link
//! is an identity plus an outbound message channel; the transport (or a
//! test harness) owns the receiving end. Links are cheap to clone and
//! are what the room stores in its directory, beatmap and up-sets.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::room::protocol::WireMsg;

/// Default depth of a link's outbound queue
const LINK_QUEUE: usize = 64;

/// Handle to a peer replica or the master driver
#[derive(Debug, Clone)]
pub struct PeerLink {
    id: String,
    tx: mpsc::Sender<WireMsg>,
}

impl PeerLink {
    /// Wrap an existing outbound channel
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<WireMsg>) -> Self {
        Self { id: id.into(), tx }
    }

    /// Create a link together with its receiving end
    pub fn channel(id: impl Into<String>) -> (Self, mpsc::Receiver<WireMsg>) {
        let (tx, rx) = mpsc::channel(LINK_QUEUE);
        (Self::new(id, tx), rx)
    }

    /// Identity of the peer behind this link
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message for delivery. Never blocks; an unreachable or
    /// congested peer surfaces through the failure detector, not here.
    pub fn send(&self, msg: WireMsg) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                warn!(peer = %self.id, msg = msg.type_name(), "peer queue full, dropping message");
            }
            Err(TrySendError::Closed(msg)) => {
                debug!(peer = %self.id, msg = msg.type_name(), "peer link closed, dropping message");
            }
        }
    }
}
