//! Catalog service entry point

use anyhow::{Context, Result};
use clap::Parser;
use port_catalog::CatalogService;
use port_config::{defaults, init_logging, PortConfig};
use port_network::ActorUri;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay (config/environments/<name>.toml)
    #[arg(short, long)]
    environment: Option<String>,

    /// Address to listen on
    #[arg(long, default_value = "tcp://0.0.0.0:7400/catalog/directory")]
    listen: String,

    /// Peer catalog addresses, in addition to configured peers
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Port name
    #[arg(long, default_value = "catalog")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PortConfig::load(args.config.as_deref(), args.environment.as_deref())
        .context("Failed to load configuration")?;
    config.catalog.peers.extend(args.peers);
    init_logging(&config.logging);

    info!("Starting catalog service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let listen = ActorUri::parse(&args.listen)
        .with_context(|| format!("Invalid listen address '{}'", args.listen))?;
    if listen.path() != defaults::catalog::SERVICE_PATH {
        info!(
            path = listen.path(),
            default = defaults::catalog::SERVICE_PATH,
            "Serving catalog on a non-default path"
        );
    }

    let catalog = CatalogService::from_config(args.name, &config)?;
    let bound = catalog.open(&listen).await?;
    info!(
        uri = %bound,
        peers = config.catalog.peers.len(),
        max_hop_count = config.catalog.max_hop_count,
        "Catalog service listening"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Shutdown signal received");

    catalog.disconnect().await;
    port_actors::shutdown_all().await;
    Ok(())
}
