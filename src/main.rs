//! tunnelrpc - Turn-taking RPC over TCP
//!
//! One coordinator drives a fixed roster of peers: it calls methods on them
//! and reads their tunnels, one exchange at a time.

mod config;
mod coordinator;
mod network;
mod peer;
mod protocol;
mod roles;
mod session;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use coordinator::Coordinator;
use network::{Client, Server};
use peer::Peer;
use roles::{CoordinatorRole, RoleRegistry};

/// tunnelrpc - coordinator/peer RPC over TCP
#[derive(Parser, Debug)]
#[command(name = "tunnelrpc")]
#[command(author = "tunnelrpc Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Run the coordinator (no ID) or the peer with the given roster ID", long_about = None)]
struct Cli {
    /// Path to the roster file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print a sample roster and exit, or write it to --config when given
    #[arg(long, conflicts_with = "id")]
    sample_config: bool,

    /// Roster ID of this peer (must be greater than 0); omit to run the coordinator
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    id: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.sample_config {
        match &cli.config {
            Some(path) => {
                if path.exists() {
                    bail!("{} already exists", path.display());
                }
                Config::sample().save(path)?;
                println!("Sample roster written to {}", path.display());
            }
            None => println!("{}", config::generate_sample_config()?),
        }
        return Ok(());
    }

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let roles = RoleRegistry::builtin();

    match cli.id {
        None => run_coordinator(&config, &roles).await?,
        Some(id) => run_peer(&config, id, &roles).await?,
    }

    Ok(())
}

/// Run the coordinator (roster id 0)
async fn run_coordinator(config: &Config, roles: &RoleRegistry) -> anyhow::Result<()> {
    let me = config
        .coordinator()
        .context("Roster has no coordinator entry")?;
    let role = roles.coordinator(&me.name).ok_or_else(|| {
        anyhow!(
            "Unknown coordinator role '{}' (known: {})",
            me.name,
            roles.coordinator_names().collect::<Vec<_>>().join(", ")
        )
    })?;

    let addr = me
        .endpoint()
        .resolve()
        .await
        .with_context(|| format!("Could not resolve {}", me.endpoint()))?;

    tracing::info!("Starting coordinator '{}' on {}", me.name, addr);

    let server = Server::bind(addr, config.network.to_transport())?;
    drive_coordinator(config, role, server).await
}

/// Group the roster, wait for every peer, run the role, then end the session
async fn drive_coordinator(
    config: &Config,
    mut role: Box<dyn CoordinatorRole>,
    server: Server,
) -> anyhow::Result<()> {
    let mut coordinator = Coordinator::new(server);
    coordinator.populate_groups(config, role.groups()).await?;

    let grouped: HashSet<&str> = role.groups().iter().map(|pair| pair.role).collect();
    for player in config.peers().filter(|p| !grouped.contains(p.name.as_str())) {
        tracing::warn!(
            "Player {} '{}' belongs to no group and will not be admitted",
            player.id,
            player.name
        );
    }

    coordinator.handshake_with_peers().await?;
    role.run(&mut coordinator).await?;
    if let Some(summary) = role.summary() {
        tracing::info!("Session result: {}", summary);
    }
    coordinator.end_protocol().await?;

    Ok(())
}

/// Run one peer
async fn run_peer(config: &Config, id: u32, roles: &RoleRegistry) -> anyhow::Result<()> {
    let (peer, local_addr, server_addr) = prepare_peer(config, id, roles).await?;
    let client = Client::bind(local_addr, config.network.to_transport())?;
    serve_peer(id, peer, client, server_addr).await
}

/// Set up the peer's role and resolve both ends of its connection
async fn prepare_peer(
    config: &Config,
    id: u32,
    roles: &RoleRegistry,
) -> anyhow::Result<(Peer, SocketAddr, SocketAddr)> {
    let me = config
        .player(id)
        .ok_or_else(|| anyhow!("Check your input id within config file: no player {}", id))?;
    let coordinator = config
        .coordinator()
        .context("Roster has no coordinator entry")?;
    let role = roles.peer(&me.name).ok_or_else(|| {
        anyhow!(
            "Unknown peer role '{}' (known: {})",
            me.name,
            roles.peer_names().collect::<Vec<_>>().join(", ")
        )
    })?;

    let mut peer = Peer::new();
    role.setup(&mut peer)?;
    if peer.tunnels().is_empty() && peer.methods().is_empty() {
        tracing::warn!("Peer role '{}' exposes no tunnels and no methods", me.name);
    }

    let local_addr = me
        .endpoint()
        .resolve()
        .await
        .with_context(|| format!("Could not resolve {}", me.endpoint()))?;
    let server_addr = coordinator
        .endpoint()
        .resolve()
        .await
        .with_context(|| format!("Could not resolve {}", coordinator.endpoint()))?;

    tracing::info!(
        "Starting peer {} '{}' on {} with {} tunnels and {} methods, coordinator at {}",
        id,
        me.name,
        local_addr,
        peer.tunnels().len(),
        peer.methods().len(),
        server_addr
    );

    Ok((peer, local_addr, server_addr))
}

/// Connect from the bound socket and serve until the end of session
async fn serve_peer(
    id: u32,
    mut peer: Peer,
    client: Client,
    server_addr: SocketAddr,
) -> anyhow::Result<()> {
    let mut conn = client.connect(server_addr).await?;
    peer.run(&mut conn).await?;

    tracing::info!("Peer {} finished ({:?})", id, peer.state());
    Ok(())
}
