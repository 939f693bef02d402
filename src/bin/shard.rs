//! AtlasKV Shard Binary
//!
//! Serves one in-memory shard over TCP.

use std::sync::Arc;

use atlaskv_cluster::network::Server;
use atlaskv_cluster::store::MemoryStore;
use atlaskv_cluster::ServerConfig;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasKV Shard Server
#[derive(Parser, Debug)]
#[command(name = "atlaskv-shard")]
#[command(about = "In-memory shard server for an AtlasKV cluster")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7001")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Close idle connections after this many milliseconds (0 = never)
    #[arg(long, default_value = "0")]
    read_timeout_ms: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlaskv_cluster=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("AtlasKV Shard v{}", atlaskv_cluster::VERSION);

    let config = ServerConfig::builder()
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .read_timeout_ms(args.read_timeout_ms)
        .build();

    let server = match Server::bind(config, Arc::new(MemoryStore::new())) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start shard: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
