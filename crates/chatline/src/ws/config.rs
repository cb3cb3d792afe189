//! WebSocket hub configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the hub and its connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Seconds between keepalive pings on each connection (0 disables).
    pub ping_interval_secs: u64,

    /// `new-message` frames a connection may queue before it is considered
    /// broken. Presence updates are coalesced and do not count.
    pub connection_buffer: usize,

    /// Pending commands the hub queue holds before callers wait.
    pub hub_buffer: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            connection_buffer: 64,
            hub_buffer: 1024,
        }
    }
}

impl WsConfig {
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}
