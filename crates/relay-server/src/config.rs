//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;

/// Runtime configuration for the relay server, derived from [`RelaySettings`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Bus channels subscribed at startup.
    pub channels: Vec<String>,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Close a connection after this long without any inbound frame.
    pub pong_timeout: Duration,
    /// Outbound frames buffered per connection before it is evicted.
    pub send_queue_capacity: usize,
    /// Upper bound on graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            channels: settings.bus.channels.clone(),
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
            pong_timeout: Duration::from_secs(server.pong_timeout_secs),
            send_queue_capacity: server.send_queue_capacity,
            shutdown_timeout: Duration::from_secs(server.shutdown_timeout_secs),
        }
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&RelaySettings::default())
    }
}
