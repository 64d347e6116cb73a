//! Supervisor and status API settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supervisor-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Default time a service gets to exit after SIGTERM.
    pub graceful_timeout_seconds: u64,

    /// Report partial success from start-up instead of rolling back.
    pub best_effort: bool,

    /// Lower bound on the health loop tick in milliseconds.
    pub monitor_tick_ms: u64,

    /// How long a process must stay alive to count as ready.
    pub ready_settle_ms: u64,

    /// Poll period for TCP/HTTP readiness probes.
    pub ready_poll_ms: u64,

    /// Output lines retained per service for diagnostics.
    pub output_tail_lines: usize,

    /// Capacity of the control loop's command queue.
    pub command_queue: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            graceful_timeout_seconds: 10,
            best_effort: false,
            monitor_tick_ms: 1000,
            ready_settle_ms: 500,
            ready_poll_ms: 250,
            output_tail_lines: 50,
            command_queue: 32,
        }
    }
}

impl SupervisorSettings {
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_seconds)
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_millis(self.monitor_tick_ms)
    }

    pub fn ready_settle(&self) -> Duration {
        Duration::from_millis(self.ready_settle_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }
}

/// Local status API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusApiConfig {
    /// Whether the status API is served.
    pub enabled: bool,

    /// Bind address.
    pub bind: String,

    /// Listen port.
    pub port: u16,
}

impl Default for StatusApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

impl StatusApiConfig {
    /// URL a local client uses to reach this API.
    pub fn base_url(&self) -> String {
        let host = match self.bind.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}
