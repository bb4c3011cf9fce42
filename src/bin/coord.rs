//! Coordinator binary

use clap::Parser;
use std::net::SocketAddr;
use tpckv::{common::config::Config, Coordinator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tpckv-coord")]
#[command(about = "tpckv coordinator: client API, replica registration and 2PC")]
#[command(version)]
struct Cli {
    /// Bind address for client requests
    #[arg(long)]
    client: Option<SocketAddr>,

    /// Bind address for replica registration
    #[arg(long)]
    register: Option<SocketAddr>,

    /// Replicas that must register before requests are served
    #[arg(long)]
    replicas: Option<usize>,

    /// Per-call replica timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Worker tasks per listener
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config from file, then override with CLI arguments
    let config = Config::load();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut coord_config = config.coordinator;
    if let Some(client) = cli.client {
        coord_config.client_addr = client;
    }
    if let Some(register) = cli.register {
        coord_config.register_addr = register;
    }
    if let Some(replicas) = cli.replicas {
        coord_config.replicas = replicas;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        coord_config.timeout_ms = timeout_ms;
    }
    if let Some(workers) = cli.workers {
        coord_config.workers = workers;
    }

    tracing::info!("tpckv {}", tpckv::BUILD_INFO);
    let coord = Coordinator::bind(coord_config).await?;
    coord.serve().await?;

    Ok(())
}
