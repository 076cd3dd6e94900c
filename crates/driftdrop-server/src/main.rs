//! driftdrop coordination server.
//!
//! Rendezvous service that lets a file owner and receivers find each other
//! before the payload moves over a direct peer channel.

mod config;
mod server;

use clap::Parser;
use std::path::PathBuf;

use config::Config;
use server::{RendezvousServer, ServerConfig};

/// driftdrop rendezvous server
#[derive(Parser)]
#[command(name = "driftdropd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(listen) = cli.listen {
        config.network.listen_addr = listen;
    }
    config.apply_env();
    config.validate()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug".to_string()
        } else {
            config.logging.level.clone()
        })
        .init();

    let bind_addr = config.parse_listen_addr()?;
    let server = RendezvousServer::bind_with_config(
        bind_addr,
        ServerConfig {
            max_clients: config.session.max_clients,
            client_timeout: config.client_timeout(),
            cleanup_interval: config.cleanup_interval(),
            session_ttl: config.session_ttl(),
        },
    )
    .await?;

    server.run().await?;
    Ok(())
}
