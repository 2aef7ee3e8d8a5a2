//! Multi-Room WebSocket Chat Server - Entry Point
//!
//! Starts the TCP listener and the hub actor, then hands the accept
//! loop to the connection layer.

use std::env;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomcast::{serve, Hub};

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:8085";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=roomcast=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomcast=info")),
        )
        .init();

    // Get bind address from command line or use default
    let addr = env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket chat server listening on {}", addr);

    let (hub, handle) = Hub::new();
    tokio::spawn(hub.run());

    serve(listener, handle).await?;
    Ok(())
}
