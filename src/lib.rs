//! WebSocket Chat Relay Library
//!
//! A real-time relay: every client sends short text messages that are either
//! broadcast to everyone online or delivered to one named recipient.
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Coordinator` is the central actor owning the directory of live
//!   connections; it alone decides who is online and who gets a message
//! - Each connection runs one read task and one write task
//! - Each write task drains a bounded mailbox that the coordinator fills
//!   with non-blocking sends; a full or closed mailbox gets its connection
//!   evicted
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use chat_relay::{serve, Config, Coordinator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let listener = TcpListener::bind(&config.bind_address).await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(config.control_capacity);
//!
//!     tokio::spawn(Coordinator::new(cmd_rx).run());
//!     serve(listener, cmd_tx, Arc::new(config)).await;
//! }
//! ```

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod handler;
pub mod message;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use config::{Config, ConfigError};
pub use connection::Connection;
pub use coordinator::{Command, Coordinator};
pub use directory::Directory;
pub use error::{AppError, DeliveryError, InboundError};
pub use handler::handle_connection;
pub use message::{DeliveryRequest, Envelope, InboundMessage, Route};
pub use server::serve;
pub use types::{ClientId, Payload, Roster, SessionId};
