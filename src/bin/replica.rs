use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tpckv::{common::config::Config, ReplicaServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tpckv-replica")]
#[command(about = "tpckv replica - votes on and applies 2PC decisions")]
#[command(version)]
struct Args {
    /// Replica ID (its position on the ring)
    #[arg(short, long)]
    id: Option<u64>,

    /// Address to listen on for coordinator traffic
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Host name advertised to the coordinator
    #[arg(long)]
    advertise_host: Option<String>,

    /// Coordinator registration address
    #[arg(short, long)]
    coordinator: Option<String>,

    /// Recovery log file
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Sled directory for a durable backing store
    #[arg(long)]
    store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load();

    // Initialize tracing
    let log_level = args.log_level.clone().unwrap_or(config.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut replica = config.replica;
    if let Some(id) = args.id {
        replica.id = id;
    }
    if let Some(bind) = args.bind {
        replica.bind_addr = bind;
    }
    if let Some(host) = args.advertise_host {
        replica.advertise_host = Some(host);
    }
    if let Some(coordinator) = args.coordinator {
        replica.coordinator = coordinator;
    }
    if let Some(log) = args.log {
        replica.log_path = log;
    }
    if let Some(store) = args.store {
        replica.store_path = Some(store);
    }

    tracing::info!("tpckv {}", tpckv::BUILD_INFO);
    let server = ReplicaServer::bind(replica).await?;
    server.serve().await?;

    Ok(())
}
