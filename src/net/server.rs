//! Network Server
//!
//! TCP listener accepting connections from peer replicas and the
//! master driver.

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{line_reader, line_writer, read_loop, write_loop, PeerLink, MASTER_ID};
use crate::error::Result;
use crate::room::protocol::WireMsg;
use crate::room::RoomMsg;

/// Network server for cluster communication
pub struct NetworkServer {
    /// Bind address
    bind_address: String,
    /// This replica's id, echoed back during the join handshake
    self_id: String,
    /// Channel into the room actor
    mailbox: mpsc::Sender<RoomMsg>,
}

impl NetworkServer {
    /// Create a new network server
    pub fn new(bind_address: String, self_id: String, mailbox: mpsc::Sender<RoomMsg>) -> Self {
        Self {
            bind_address,
            self_id,
            mailbox,
        }
    }

    /// Accept connections until the process shuts down
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        info!("network server listening on {}", self.bind_address);

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    let peer_addr = addr.to_string();
                    let self_id = self.self_id.clone();
                    let mailbox = self.mailbox.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, self_id, mailbox).await {
                            warn!("connection error from {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single inbound connection, starting with the join handshake
async fn handle_connection(
    socket: TcpStream,
    self_id: String,
    mailbox: mpsc::Sender<RoomMsg>,
) -> Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut lines = line_reader(read_half);
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(write_loop(line_writer(write_half), rx));

    let first = match lines.next().await {
        Some(line) => line?,
        None => return Ok(()),
    };

    let link = match WireMsg::parse(&first)? {
        WireMsg::Join { id } => {
            let link = PeerLink::new(id, tx);
            // identify ourselves so the dialer can attribute our lines
            link.send(WireMsg::Join {
                id: self_id.clone(),
            });
            if mailbox
                .send(RoomMsg::PeerJoined(link.clone()))
                .await
                .is_err()
            {
                return Ok(());
            }
            link
        }
        WireMsg::JoinMaster => {
            let link = PeerLink::new(MASTER_ID, tx);
            if mailbox
                .send(RoomMsg::MasterJoined(link.clone()))
                .await
                .is_err()
            {
                return Ok(());
            }
            link
        }
        other => {
            warn!(
                msg = other.type_name(),
                "connection did not start with a join handshake"
            );
            return Ok(());
        }
    };

    read_loop(lines, link, mailbox).await
}
