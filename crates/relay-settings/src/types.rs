//! Settings types and defaults.

use relay_core::channels::default_subscriptions;
use relay_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Bus URL that selects the in-process bus instead of Redis.
pub const MEMORY_BUS_URL: &str = "memory://";

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Shared message bus.
    pub bus: BusSettings,
    /// Diagnostics.
    pub logging: LoggingSettings,
}

/// HTTP and WebSocket listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Seconds between server Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds without any inbound frame before a client is dropped.
    pub pong_timeout_secs: u64,
    /// Outbound frames buffered per client before it is evicted.
    pub send_queue_capacity: usize,
    /// Seconds to wait for tasks to finish on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
            send_queue_capacity: 1024,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Message bus settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// `redis://...` or [`MEMORY_BUS_URL`].
    pub url: String,
    /// Channels subscribed at startup.
    pub channels: Vec<String>,
}

impl BusSettings {
    /// Whether the in-process bus was requested.
    pub fn is_memory(&self) -> bool {
        self.url.starts_with(MEMORY_BUS_URL)
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            url: "redis://redis:6379/0".into(),
            channels: default_subscriptions(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

impl RelaySettings {
    /// Reject combinations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bus.url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("bus.url must not be empty".into()));
        }
        if self.bus.channels.is_empty() {
            return Err(SettingsError::InvalidValue(
                "bus.channels must not be empty".into(),
            ));
        }
        if let Some(blank) = self.bus.channels.iter().find(|c| c.trim().is_empty()) {
            return Err(SettingsError::InvalidValue(format!(
                "bus.channels contains a blank name: {blank:?}"
            )));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.send_queue_capacity must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeat_interval_secs must be at least 1".into(),
            ));
        }
        if self.server.pong_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.pong_timeout_secs ({}) is shorter than heartbeat_interval_secs ({})",
                self.server.pong_timeout_secs, self.server.heartbeat_interval_secs
            )));
        }
        Ok(())
    }
}
