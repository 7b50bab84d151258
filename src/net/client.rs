//! Network Client
//!
//! Outbound connections to configured peer replicas, redialed with
//! backoff whenever they drop.

use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{line_reader, line_writer, read_loop, write_loop, PeerLink};
use crate::error::{Error, Result};
use crate::room::protocol::WireMsg;
use crate::room::RoomMsg;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Spawn a dial loop for every configured peer address
pub fn connect_peers(self_id: &str, peers: &[String], mailbox: &mpsc::Sender<RoomMsg>) {
    for address in peers {
        tokio::spawn(maintain_connection(
            address.clone(),
            self_id.to_string(),
            mailbox.clone(),
        ));
    }
}

/// Keep one peer address connected, reconnecting with backoff
async fn maintain_connection(address: String, self_id: String, mailbox: mpsc::Sender<RoomMsg>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match dial(&address).await {
            Ok(socket) => {
                info!(%address, "connected to peer");
                backoff = INITIAL_BACKOFF;
                match run_connection(socket, &self_id, &mailbox).await {
                    Ok(()) => debug!(%address, "peer connection closed"),
                    Err(e) => warn!(%address, %e, "peer connection ended"),
                }
            }
            Err(e) => {
                debug!(%e, "dial failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn dial(address: &str) -> Result<TcpStream> {
    let socket =
        TcpStream::connect(address)
            .await
            .map_err(|e| Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
    socket.set_nodelay(true)?;
    Ok(socket)
}

/// Drive a single outbound connection: send our join, learn the
/// acceptor's identity, then route its lines into the room
async fn run_connection(
    socket: TcpStream,
    self_id: &str,
    mailbox: &mpsc::Sender<RoomMsg>,
) -> Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut lines = line_reader(read_half);
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(write_loop(line_writer(write_half), rx));

    if tx
        .send(WireMsg::Join {
            id: self_id.to_string(),
        })
        .await
        .is_err()
    {
        return Ok(());
    }

    let first = match lines.next().await {
        Some(line) => line?,
        None => return Ok(()),
    };

    match WireMsg::parse(&first)? {
        WireMsg::Join { id } => {
            let link = PeerLink::new(id, tx);
            if mailbox
                .send(RoomMsg::PeerJoined(link.clone()))
                .await
                .is_err()
            {
                return Ok(());
            }
            read_loop(lines, link, mailbox.clone()).await
        }
        other => {
            warn!(
                msg = other.type_name(),
                "peer did not identify itself on accept"
            );
            Ok(())
        }
    }
}
