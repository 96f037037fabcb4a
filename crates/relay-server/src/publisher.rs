//! Fire-and-forget bus publishing.
//!
//! All publishes go through one worker task fed by an unbounded queue, so
//! callers never wait on the bus and publishes reach it in issue order.

use std::sync::Arc;

use metrics::counter;
use relay_bus::MessageBus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::echo::EchoSuppressor;
use crate::metrics::BUS_PUBLISH_ERRORS_TOTAL;

struct PublishRequest {
    channel: String,
    payload: String,
}

/// Handle for queueing bus publishes. Cheap to clone.
#[derive(Clone)]
pub struct BusPublisher {
    tx: mpsc::UnboundedSender<PublishRequest>,
}

impl BusPublisher {
    /// Start the worker. It drains whatever is queued and exits once
    /// `shutdown` is cancelled.
    pub fn spawn(
        bus: Arc<dyn MessageBus>,
        echoes: Arc<EchoSuppressor>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_publisher(rx, bus, echoes, shutdown));
        (Self { tx }, handle)
    }

    /// Queue `payload` for `channel`. Never blocks and never fails the caller.
    pub fn publish(&self, channel: impl Into<String>, payload: impl Into<String>) {
        let request = PublishRequest {
            channel: channel.into(),
            payload: payload.into(),
        };
        if let Err(e) = self.tx.send(request) {
            warn!(channel = %e.0.channel, "publisher stopped, dropping publish");
        }
    }
}

#[instrument(skip_all, name = "bus_publisher", fields(backend = bus.backend()))]
async fn run_publisher(
    mut rx: mpsc::UnboundedReceiver<PublishRequest>,
    bus: Arc<dyn MessageBus>,
    echoes: Arc<EchoSuppressor>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            request = rx.recv() => match request {
                Some(request) => publish_one(bus.as_ref(), &echoes, request).await,
                None => return,
            },
            () = shutdown.cancelled() => break,
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(request) = rx.recv().await {
        publish_one(bus.as_ref(), &echoes, request).await;
        drained += 1;
    }
    info!(drained, "publisher stopped");
}

async fn publish_one(bus: &dyn MessageBus, echoes: &EchoSuppressor, request: PublishRequest) {
    let PublishRequest { channel, payload } = request;
    // Recorded before the publish so the echo cannot beat it back.
    echoes.record(&channel, &payload);
    match bus.publish(&channel, &payload).await {
        Ok(()) => debug!(%channel, bytes = payload.len(), "published to bus"),
        Err(e) => {
            echoes.forget(&channel, &payload);
            counter!(BUS_PUBLISH_ERRORS_TOTAL).increment(1);
            warn!(%channel, error = %e, "bus publish failed");
        }
    }
}
