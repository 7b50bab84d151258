//! Network Module
//!
//! Line-framed TCP transport between replicas. The first line of every
//! connection identifies the dialer (`join <id>` for a replica,
//! `joinmaster` for the driver); everything after it is attributed to
//! that identity and forwarded into the room's mailbox.

pub mod peer;

mod client;
mod server;

pub use client::connect_peers;
pub use peer::PeerLink;
pub use server::NetworkServer;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use crate::error::Result;
use crate::room::protocol::WireMsg;
use crate::room::RoomMsg;

/// Identity the driver is registered under after a `joinmaster`
pub const MASTER_ID: &str = "master";

/// Upper bound on a single protocol line; the song list payload is the
/// only message that grows with state
pub(crate) const MAX_LINE_LEN: usize = 64 * 1024;

pub(crate) type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;
pub(crate) type LineWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

pub(crate) fn line_reader(half: OwnedReadHalf) -> LineReader {
    FramedRead::new(half, LinesCodec::new_with_max_length(MAX_LINE_LEN))
}

pub(crate) fn line_writer(half: OwnedWriteHalf) -> LineWriter {
    FramedWrite::new(half, LinesCodec::new_with_max_length(MAX_LINE_LEN))
}

/// Drain a link's outbound queue onto a connection
pub(crate) async fn write_loop(mut sink: LineWriter, mut rx: mpsc::Receiver<WireMsg>) {
    while let Some(msg) = rx.recv().await {
        let line = match msg.encode() {
            Ok(line) => line,
            Err(e) => {
                warn!(msg = msg.type_name(), %e, "failed to encode message");
                continue;
            }
        };
        if let Err(e) = sink.send(line).await {
            debug!(%e, "write failed, closing connection");
            break;
        }
    }
}

/// Forward parsed lines from an identified connection into the room
pub(crate) async fn read_loop(
    mut lines: LineReader,
    link: PeerLink,
    mailbox: mpsc::Sender<RoomMsg>,
) -> Result<()> {
    while let Some(item) = lines.next().await {
        match item {
            Ok(line) => match WireMsg::parse(&line) {
                Ok(msg) => {
                    let delivery = RoomMsg::Line {
                        from: link.clone(),
                        msg,
                    };
                    if mailbox.send(delivery).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(from = %link.id(), %e, "dropping unparseable line");
                }
            },
            Err(e) => {
                warn!(from = %link.id(), %e, "read error");
                break;
            }
        }
    }
    debug!(peer = %link.id(), "connection closed");
    Ok(())
}
