//! Relay configuration
//!
//! Loaded from environment variables with defaults matching the classic
//! hub timings: 10s write deadline, 60s read-idle deadline, pings at 9/10
//! of the idle deadline, 512 byte messages and 256 queued payloads per
//! connection.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

/// Default capacity of each connection's outbound mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default capacity of the coordinator's control channel.
pub const DEFAULT_CONTROL_CAPACITY: usize = 256;

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Default time allowed to write one frame, in seconds.
pub const DEFAULT_WRITE_WAIT_SECS: u64 = 10;

/// Default time allowed between two frames from the peer, in seconds.
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: "127.0.0.1:8080").
    pub bind_address: String,

    /// Outbound mailbox capacity per connection.
    pub mailbox_capacity: usize,

    /// Coordinator control channel capacity.
    pub control_capacity: usize,

    /// Largest accepted inbound message, in bytes.
    pub max_message_size: usize,

    /// Deadline for a single outbound write.
    pub write_wait: Duration,

    /// Read-idle deadline, refreshed by every inbound frame.
    pub pong_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            control_capacity: DEFAULT_CONTROL_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECS),
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let mailbox_capacity =
            parse_positive(vars, "RELAY_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;
        let control_capacity =
            parse_positive(vars, "RELAY_CONTROL_CAPACITY", DEFAULT_CONTROL_CAPACITY)?;
        let max_message_size =
            parse_positive(vars, "RELAY_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE)?;
        let write_wait_secs =
            parse_positive(vars, "RELAY_WRITE_WAIT_SECS", DEFAULT_WRITE_WAIT_SECS)?;
        let pong_wait_secs =
            parse_positive(vars, "RELAY_PONG_WAIT_SECS", DEFAULT_PONG_WAIT_SECS)?;

        Ok(Config {
            bind_address,
            mailbox_capacity,
            control_capacity,
            max_message_size,
            write_wait: Duration::from_secs(write_wait_secs),
            pong_wait: Duration::from_secs(pong_wait_secs),
        })
    }

    /// Keep-alive interval: must be shorter than `pong_wait` so the peer's
    /// Pong lands before the read deadline expires.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::InvalidValue(format!(
            "{} must be a positive integer, got '{}'",
            key, raw
        ))),
    }
}
