//! songctl - Songlist Driver CLI
//!
//! Plays the master role against a running replica: joins it as the
//! driver, sends one request, and prints whatever the cluster answers.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use songlist::room::protocol::WireMsg;

/// songctl - Songlist Driver CLI
#[derive(Parser)]
#[command(name = "songctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Replica address to talk to
    #[arg(short, long, default_value = "127.0.0.1:7700")]
    address: String,

    /// Seconds to wait for a response
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add or replace a song
    Add { name: String, url: String },

    /// Delete a song
    Delete { name: String },

    /// Look up a song's URL
    Get { name: String },

    /// Make the replica refresh its song list from a live peer
    FullState,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (request, wait_for_reply) = match cli.command {
        Commands::Add { name, url } => {
            if name.contains(' ') || url.contains(' ') {
                bail!("song names and URLs must be single tokens");
            }
            (WireMsg::Add { name, url }, true)
        }
        Commands::Delete { name } => (WireMsg::Delete { name }, true),
        Commands::Get { name } => (WireMsg::Get { name }, true),
        Commands::FullState => (WireMsg::RequestFullState, false),
    };

    let socket = TcpStream::connect(&cli.address)
        .await
        .with_context(|| format!("failed to connect to {}", cli.address))?;
    let mut framed = Framed::new(socket, LinesCodec::new());

    framed.send(WireMsg::JoinMaster.encode()?).await?;
    framed.send(request.encode()?).await?;

    if !wait_for_reply {
        println!("request sent to {}", cli.address);
        return Ok(());
    }

    let deadline = Duration::from_secs(cli.timeout);
    loop {
        let line = tokio::time::timeout(deadline, framed.next())
            .await
            .context("timed out waiting for a response")?;

        let Some(line) = line else {
            bail!("replica closed the connection");
        };
        let line = line?;
        println!("{line}");

        // acks and lookups end the exchange; anything else (such as a
        // coordinator announcement) is informational
        match WireMsg::parse(&line) {
            Ok(WireMsg::AckCommit | WireMsg::AckAbort | WireMsg::Resp { .. }) => break,
            Ok(_) | Err(_) => continue,
        }
    }

    Ok(())
}
