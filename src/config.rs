//! Server configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default seconds between liveness sweeps. Two consecutive missed pongs
/// cause forced termination, so the effective timeout is twice this.
pub const DEFAULT_LIVENESS_INTERVAL_SECS: u64 = 30;

/// Signaling server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind the listener to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between liveness sweeps.
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,

    /// Outbound channel capacity per client. Sends are best-effort: once a
    /// client's channel is full, further messages to it are dropped until
    /// its writer catches up.
    #[serde(default = "default_client_channel_capacity")]
    pub client_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            liveness_interval_secs: default_liveness_interval_secs(),
            client_channel_capacity: default_client_channel_capacity(),
        }
    }
}

impl ServerConfig {
    /// The `host:port` string to bind the listener to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("'host' cannot be empty".to_string());
        }
        if self.liveness_interval_secs == 0 {
            return Err("'liveness_interval_secs' must be at least 1".to_string());
        }
        if self.client_channel_capacity == 0 {
            return Err("'client_channel_capacity' must be at least 1".to_string());
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9999
}

fn default_liveness_interval_secs() -> u64 {
    DEFAULT_LIVENESS_INTERVAL_SECS
}

fn default_client_channel_capacity() -> usize {
    64
}
