//! Accept loop
//!
//! Hands every accepted TCP stream to its own `handle_connection` task.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::Config;
use crate::coordinator::Command;
use crate::handler::handle_connection;

/// Accept connections forever
///
/// Errors from a single connection (failed handshake, coordinator gone) are
/// logged and never stop the loop.
pub async fn serve(listener: TcpListener, cmd_tx: mpsc::Sender<Command>, config: Arc<Config>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let cmd_tx = cmd_tx.clone();
                let config = Arc::clone(&config);

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx, config).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
