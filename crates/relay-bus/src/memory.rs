//! In-process bus.
//!
//! Carries messages between subscribers of the same process through a
//! `tokio::sync::broadcast` channel. Used when the relay runs without Redis
//! (`memory://`) and by tests, which can also take it offline or sever its
//! subscriptions to simulate an unhealthy bus.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::errors::{BusError, Result};
use crate::message::BusMessage;
use crate::{BusStream, MessageBus};

/// Messages buffered per subscriber before it starts lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process [`MessageBus`].
pub struct MemoryBus {
    tx: Mutex<broadcast::Sender<BusMessage>>,
    capacity: usize,
    available: AtomicBool,
}

impl MemoryBus {
    /// Create a bus with the default per-subscriber buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus buffering `capacity` messages per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Mutex::new(tx),
            capacity: capacity.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Take the bus offline (`false`) or bring it back (`true`).
    ///
    /// While offline, `publish` and `subscribe` fail. Existing subscriptions
    /// stay open.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether the bus currently accepts operations.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// End every open subscription stream, as a dropped connection would.
    pub fn sever_subscriptions(&self) {
        let (tx, _) = broadcast::channel(self.capacity);
        let old = std::mem::replace(&mut *self.tx.lock(), tx);
        debug!(subscribers = old.receiver_count(), "severed memory bus subscriptions");
    }

    /// Deliver a pre-built message, bypassing `publish` (e.g. binary payloads).
    pub fn inject(&self, message: BusMessage) {
        let _ = self.tx.lock().send(message);
    }

    /// Number of live subscription streams.
    pub fn subscriber_count(&self) -> usize {
        self.tx.lock().receiver_count()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory bus is offline".into()))
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.ensure_available()?;
        // No subscribers is not an error, same as Redis returning 0 receivers.
        let receivers = self
            .tx
            .lock()
            .send(BusMessage::text(channel, payload))
            .unwrap_or(0);
        debug!(channel, receivers, "published to memory bus");
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<BusStream> {
        self.ensure_available()?;
        let wanted: HashSet<String> = channels.iter().cloned().collect();
        let rx = self.tx.lock().subscribe();

        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let keep = match item {
                Ok(msg) if wanted.contains(&msg.channel) => Some(msg),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "memory bus subscriber lagged");
                    None
                }
            };
            futures::future::ready(keep)
        });
        Ok(Box::pin(stream))
    }
}
