//! Basic type definitions for the relay
//!
//! Provides newtype wrappers and aliases shared by every component:
//! - `ClientId`: UUID-based unique connection identity
//! - `SessionId`: process-local serial of one connection instance
//! - `Payload`: an encoded outbound frame, shared across mailboxes
//! - `Roster`: identity -> display name snapshot

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Encoded outbound message.
///
/// Reference counted so a broadcast enqueues the same allocation into every
/// mailbox.
pub type Payload = Arc<str>;

/// Snapshot of all live identities and their display names.
pub type Roster = BTreeMap<ClientId, String>;

/// Unique client identifier (newtype pattern)
///
/// Assigned once when the connection is accepted and never reused, so a
/// reconnecting peer always shows up under a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Allocate a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serial number of one connection instance
///
/// Two handles registered under the same `ClientId` still carry different
/// sessions, so the coordinator can tell which one a notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Next serial for this process
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Generate a display name for peers that connect without a nickname
///
/// Shape: `guest-` followed by 4 uppercase alphanumerics.
pub fn guest_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("guest-{}", suffix)
}
