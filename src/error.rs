//! Error types for the relay
//!
//! Defines application-level errors, mailbox delivery errors and inbound
//! payload errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// All of these are fatal for the connection that hits them.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Channel send error (fatal - coordinator is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// A write did not complete within the write deadline
    #[error("Write deadline exceeded")]
    WriteTimeout,
}

/// Mailbox enqueue errors
///
/// Either variant means the consumer is considered dead and gets evicted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Mailbox is at capacity (consumer too slow)
    #[error("Mailbox full")]
    Full,

    /// The write loop has already dropped its end of the mailbox
    #[error("Mailbox closed")]
    Closed,
}

/// Errors for an inbound client payload
///
/// Never fatal: the payload is dropped and the connection stays up.
#[derive(Debug, Error)]
pub enum InboundError {
    /// Payload is not a valid message object
    #[error("Invalid message format: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload carries no recipient
    #[error("Message has no recipient")]
    MissingRecipient,
}
