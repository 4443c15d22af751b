//! WebSocket Chat Relay - Entry Point
//!
//! Loads configuration, starts the Coordinator actor and accepts connections.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_relay::{serve, Config, Coordinator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let mut config = Config::from_env()?;

    // Bind address from command line overrides the environment
    if let Some(addr) = env::args().nth(1) {
        config.bind_address = addr;
    }
    info!("Configuration: {:?}", config);

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("WebSocket Chat Relay listening on {}", config.bind_address);

    let (cmd_tx, cmd_rx) = mpsc::channel(config.control_capacity);
    tokio::spawn(Coordinator::new(cmd_rx).run());

    serve(listener, cmd_tx, Arc::new(config)).await;

    Ok(())
}
