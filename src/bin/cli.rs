//! CLI for talking to a coordinator

use clap::{Parser, Subcommand};
use std::time::Duration;
use tpckv::KvClient;

#[derive(Parser)]
#[command(name = "tpckv")]
#[command(about = "tpckv replicated key-value store CLI")]
#[command(version)]
struct Cli {
    /// Coordinator client address
    #[arg(long, default_value = "127.0.0.1:8080")]
    coordinator: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a key
    Get {
        /// Key
        key: String,
    },

    /// Write a key
    Put {
        /// Key
        key: String,

        /// Value
        value: String,
    },

    /// Delete a key
    Del {
        /// Key
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = KvClient::new(cli.coordinator).with_timeout(Duration::from_millis(cli.timeout_ms));

    match cli.command {
        Commands::Get { key } => {
            println!("{}", client.get(&key).await?);
        }

        Commands::Put { key, value } => {
            client.put(&key, &value).await?;
            println!("OK");
        }

        Commands::Del { key } => {
            client.del(&key).await?;
            println!("OK");
        }
    }

    Ok(())
}
