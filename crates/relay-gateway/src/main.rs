//! # relay-gateway
//!
//! Live event relay binary: loads settings, connects the bus, serves
//! WebSocket clients and `POST /broadcast`, and shuts down on Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_bus::{MemoryBus, MessageBus, RedisBus};
use relay_core::logging::{bootstrap_subscriber, init_subscriber};
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{BusSettings, RelaySettings, load_settings};
use tracing::{info, warn};

/// Live event relay gateway.
#[derive(Parser, Debug)]
#[command(name = "relay-gateway", about = "Live event relay gateway")]
struct Cli {
    /// JSON settings file, merged over defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings and `RELAY_HOST`).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Bus URL, `redis://...` or `memory://` (overrides settings and `REDIS_URL`).
    #[arg(long)]
    bus_url: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref url) = self.bus_url {
            settings.bus.url.clone_from(url);
        }
    }
}

async fn connect_bus(settings: &BusSettings) -> Result<Arc<dyn MessageBus>> {
    if settings.is_memory() {
        warn!("using in-process bus; events will not reach other relay processes");
        return Ok(Arc::new(MemoryBus::new()));
    }
    let bus = RedisBus::connect(&settings.url)
        .await
        .context("Failed to connect to message bus")?;
    Ok(Arc::new(bus))
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The loader warns about ignored env values before logging is configured.
    let mut settings = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        load_settings(cli.config.as_deref())
    })
    .context("Failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let bus = connect_bus(&settings.bus).await?;
    let config = ServerConfig::from_settings(&settings);
    let bind_addr = config.bind_addr();
    let server = RelayServer::new(config, bus, Some(metrics));

    server
        .start_bridge()
        .await
        .context("Failed to subscribe to bus channels")?;
    let addr = server
        .listen()
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!(
        channels = ?settings.bus.channels,
        "relay gateway listening on http://{addr} (ws://{addr}/ws)"
    );

    shutdown_signal().await?;
    server.shutdown_gracefully().await;
    Ok(())
}
