//! nodelink daemon
//!
//! Environment:
//! - `NODELINK_DATA_DIR`: store root (default `<data dir>/nodelink`)
//! - `NODELINK_PORT`: listen port (default random)
//! - `NODELINK_ID`: node id (default random)
//! - `NODELINK_BOOTSTRAP`: comma-separated `ip:port` peers to dial at startup

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nodelink::{LinkNode, NodeConfig, RegistryConfig};

fn config_from_env() -> NodeConfig {
    let data_dir = std::env::var_os("NODELINK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nodelink")
        });

    let listen_port = match std::env::var("NODELINK_PORT") {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!("Ignoring NODELINK_PORT={}: {}", raw, e);
            0
        }),
        Err(_) => 0,
    };

    let bootstrap_peers: Vec<SocketAddr> = std::env::var("NODELINK_BOOTSTRAP")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!("Ignoring bootstrap peer {}: {}", s, e);
                None
            }
        })
        .collect();

    NodeConfig {
        id: std::env::var("NODELINK_ID").unwrap_or_default(),
        listen_port,
        bootstrap_peers,
        registry: RegistryConfig {
            data_dir,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config_from_env();
    std::fs::create_dir_all(&config.registry.data_dir).expect("Failed to create data directory");
    tracing::info!("Starting nodelink with data at {:?}", config.registry.data_dir);

    let node = LinkNode::start(config).await.expect("Failed to start node");
    tracing::info!("Node {} up on {}", node.local_id(), node.local_addr());

    let mut status = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                let stats = node.registry().stats();
                tracing::info!(
                    connected = stats.connected,
                    faulted = stats.faulted,
                    flushes = stats.flushes,
                    "Registry status"
                );
            }
        }
    }

    tracing::info!("Shutting down");
    if let Err(e) = node.shutdown().await {
        tracing::error!("Shutdown failed: {}", e);
    }
}
