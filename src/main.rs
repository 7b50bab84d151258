//! Songlist - Replicated Song Catalog
//!
//! Replica process entry point: loads the configuration, starts the
//! room actor and the network layer, and runs until interrupted.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songlist::config::SonglistConfig;
use songlist::error::Result;
use songlist::net::{connect_peers, NetworkServer};
use songlist::room::{Room, RoomConfig};

/// Songlist - Replicated Song Catalog
#[derive(Parser)]
#[command(name = "songlist")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "songlist.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the songlist replica
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "songlist.toml")]
        output: PathBuf,

        /// Replica id (must be a non-negative integer)
        #[arg(long, default_value = "0")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show replica information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the replica
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("starting songlist replica...");

    let config = match SonglistConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };
    tracing::info!("loaded configuration for replica {}", config.node.id);

    let room = Room::spawn(RoomConfig {
        self_id: config.node.id.clone(),
        beatrate: config.beatrate(),
        alive_threshold: config.alive_threshold(),
        startup_delay: config.startup_delay(),
    })?;

    let server = NetworkServer::new(
        config.node.bind_address.clone(),
        config.node.id.clone(),
        room.sender(),
    );

    // a peer entry that names ourselves is skipped, so the same peer
    // list can be deployed to every replica
    let own_address = config.advertise_address();
    let peers: Vec<String> = config
        .cluster
        .peers
        .iter()
        .filter(|peer| peer.as_str() != own_address)
        .cloned()
        .collect();
    connect_peers(&config.node.id, &peers, &room.sender());
    tracing::info!("dialing {} configured peer(s)", peers.len());

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                tracing::error!("network server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    room.shutdown().await;
    tracing::info!("songlist shutdown complete");
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(
        r#"# Songlist Configuration

[node]
id = "{node_id}"
bind_address = "0.0.0.0:7700"
# advertise_address = "my-public-ip:7700"

[cluster]
peers = []
# peers = ["replica-1.example.com:7700", "replica-2.example.com:7700"]
beatrate_ms = 500
alive_threshold_ms = 2000
startup_delay_ms = 3000

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your peers, then start with:");
    println!("  songlist start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match SonglistConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Replica ID:   {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Peers:        {}", config.cluster.peers.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show replica information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = SonglistConfig::from_file(&config_path)?;

    println!("Songlist Replica Information");
    println!("============================");
    println!();
    println!("Replica ID:       {}", config.node.id);
    println!("Bind Address:     {}", config.node.bind_address);
    println!("Advertise:        {}", config.advertise_address());
    println!();
    println!("Cluster Configuration:");
    println!("  Peers:          {:?}", config.cluster.peers);
    println!("  Beat Rate:      {} ms", config.cluster.beatrate_ms);
    println!("  Alive After:    {} ms", config.cluster.alive_threshold_ms);
    println!("  Startup Delay:  {} ms", config.cluster.startup_delay_ms);

    Ok(())
}
