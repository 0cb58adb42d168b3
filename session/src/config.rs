use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables shared by the registry, session actors and connection actors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds a session may sit with no connections before it is evicted.
    pub idle_timeout_secs: u64,
    /// Seconds between idle sweeps.
    pub reap_interval_secs: u64,
    /// Fragments buffered per connection before it counts as a slow consumer.
    pub outbox_capacity: usize,
    /// Push the current fragment to a connection as soon as it attaches.
    pub push_on_attach: bool,
    pub request_timeout_ms: u64,
    /// How long a handshake-bound connection may take to name its session.
    pub handshake_timeout_ms: u64,
    /// Handlers slower than this are logged.
    pub slow_dispatch_ms: u64,
    /// Actions one connection may have queued but not yet applied. Reading
    /// from that client pauses at the limit.
    pub max_pending_actions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            reap_interval_secs: 30,
            outbox_capacity: 64,
            push_on_attach: true,
            request_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
            slow_dispatch_ms: 10,
            max_pending_actions: 32,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbox_capacity == 0 {
            return Err(ConfigError::Zero("outbox_capacity"));
        }
        if self.reap_interval_secs == 0 {
            return Err(ConfigError::Zero("reap_interval_secs"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Zero("request_timeout_ms"));
        }
        if self.max_pending_actions == 0 {
            return Err(ConfigError::Zero("max_pending_actions"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn slow_dispatch(&self) -> Duration {
        Duration::from_millis(self.slow_dispatch_ms)
    }
}
