//! Connection handle
//!
//! The coordinator-side view of one live connection: its identity, display
//! name and the producing end of its outbound mailbox.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DeliveryError;
use crate::types::{ClientId, Payload, SessionId};

/// Live connection as held in the directory
///
/// The coordinator owns the only `mailbox` sender. Dropping the handle
/// therefore closes the mailbox, which is how the write loop learns it has
/// been released.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// This particular connection instance
    pub session: SessionId,
    /// Display name, fixed for the connection's lifetime
    pub display_name: String,
    /// Coordinator → write loop mailbox
    mailbox: mpsc::Sender<Payload>,
}

impl Connection {
    pub fn new(id: ClientId, display_name: String, mailbox: mpsc::Sender<Payload>) -> Self {
        Self {
            id,
            session: SessionId::next(),
            display_name,
            mailbox,
        }
    }

    /// Enqueue a payload without waiting
    ///
    /// Returns an error if the mailbox is full or its consumer is gone;
    /// the caller is expected to evict the connection in both cases.
    pub fn try_deliver(&self, payload: Payload) -> Result<(), DeliveryError> {
        self.mailbox.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
