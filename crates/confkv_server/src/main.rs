//! confkv server
//!
//! Runs a single-node in-memory store for local development and tests.
//! Data lives only as long as the process.

use clap::Parser;
use confkv_server::{ServerConfig, StoreServer};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Single-node in-memory revisioned key-value store.
#[derive(Parser)]
#[command(name = "confkv-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:2379")]
    listen: SocketAddr,

    /// Maximum concurrent client connections
    #[arg(long, default_value_t = 1000)]
    max_connections: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::new(cli.listen).with_max_connections(cli.max_connections);
    let server = StoreServer::bind(config).await?;
    server
        .serve_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
