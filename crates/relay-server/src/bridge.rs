//! Bus bridge: turns messages from the bus subscription into envelopes and
//! hands them to the broadcaster.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use relay_bus::{BusMessage, BusPayload, BusStream, MessageBus};
use relay_core::Envelope;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::echo::EchoSuppressor;
use crate::metrics::{
    BUS_ECHOES_SUPPRESSED_TOTAL, BUS_MESSAGES_DROPPED_TOTAL, BUS_MESSAGES_RECEIVED_TOTAL,
    BUS_RESUBSCRIBES_TOTAL,
};
use crate::websocket::broadcast::{BroadcastManager, DeliveryReport};

/// Delay before the first re-subscribe attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Cap on the re-subscribe delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Result of handling one bus message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handled {
    /// Fanned out to local clients.
    Broadcast(DeliveryReport),
    /// Own publish coming back; already delivered locally.
    Echo,
    /// Not text; dropped.
    Dropped,
}

/// Subscribes to the configured channels and feeds the broadcaster.
pub struct BusBridge {
    bus: Arc<dyn MessageBus>,
    channels: Vec<String>,
    broadcast: Arc<BroadcastManager>,
    echoes: Arc<EchoSuppressor>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl BusBridge {
    /// Create a bridge for `channels`.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        channels: Vec<String>,
        broadcast: Arc<BroadcastManager>,
        echoes: Arc<EchoSuppressor>,
    ) -> Self {
        Self {
            bus,
            channels,
            broadcast,
            echoes,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Override the re-subscribe backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Subscribe to every configured channel. Used at startup, where failure
    /// is fatal to the caller.
    pub async fn subscribe(&self) -> relay_bus::Result<BusStream> {
        let stream = self.bus.subscribe(&self.channels).await?;
        info!(backend = self.bus.backend(), channels = ?self.channels, "subscribed to bus");
        Ok(stream)
    }

    /// Convert one bus message and broadcast it.
    pub fn handle_message(&self, message: BusMessage) -> Handled {
        counter!(BUS_MESSAGES_RECEIVED_TOTAL).increment(1);
        let text = match message.payload {
            BusPayload::Text(text) => text,
            BusPayload::Binary(bytes) => {
                counter!(BUS_MESSAGES_DROPPED_TOTAL).increment(1);
                warn!(channel = %message.channel, bytes = bytes.len(), "dropping non-text bus message");
                return Handled::Dropped;
            }
        };

        if self.echoes.take(&message.channel, &text) {
            counter!(BUS_ECHOES_SUPPRESSED_TOTAL).increment(1);
            debug!(channel = %message.channel, "skipping echo of own publish");
            return Handled::Echo;
        }

        let envelope = Envelope::from_bus_payload(&message.channel, &text);
        Handled::Broadcast(self.broadcast.broadcast(&envelope))
    }

    /// Pump `stream` into the broadcaster until `cancel` fires.
    ///
    /// When the subscription ends the bridge re-subscribes with capped
    /// exponential backoff.
    #[instrument(skip_all, name = "bus_bridge", fields(backend = self.bus.backend()))]
    pub async fn run(self, stream: BusStream, cancel: CancellationToken) {
        let mut stream = stream;
        loop {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("bus bridge stopped");
                        return;
                    }
                    next = stream.next() => match next {
                        Some(message) => {
                            let _ = self.handle_message(message);
                        }
                        None => break,
                    },
                }
            }

            let stale = self.echoes.clear();
            warn!(stale_echoes = stale, "bus subscription lost, re-subscribing");
            match self.resubscribe(&cancel).await {
                Some(fresh) => {
                    // Publishes recorded while unsubscribed have no echo coming.
                    let _ = self.echoes.clear();
                    stream = fresh;
                }
                None => {
                    info!("bus bridge stopped");
                    return;
                }
            }
        }
    }

    async fn resubscribe(&self, cancel: &CancellationToken) -> Option<BusStream> {
        let mut delay = self.initial_backoff;
        let mut attempt: u32 = 0;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
            match self.bus.subscribe(&self.channels).await {
                Ok(stream) => {
                    counter!(BUS_RESUBSCRIBES_TOTAL).increment(1);
                    info!(attempt, "re-subscribed to bus");
                    return Some(stream);
                }
                Err(e) => {
                    warn!(attempt, error = %e, retry_in = ?delay, "re-subscribe failed");
                    delay = (delay * 2).min(self.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_bus::MemoryBus;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use crate::echo::DEFAULT_ECHO_TTL;
    use crate::websocket::connection::ClientConnection;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        bus: Arc<MemoryBus>,
        broadcast: Arc<BroadcastManager>,
        echoes: Arc<EchoSuppressor>,
        rx: mpsc::Receiver<Arc<String>>,
    }

    fn channels() -> Vec<String> {
        vec!["chat.events".into(), "gift.events".into()]
    }

    fn harness() -> Harness {
        let broadcast = Arc::new(BroadcastManager::new());
        let (tx, rx) = mpsc::channel(64);
        let conn = Arc::new(ClientConnection::new("c1".into(), tx, CancellationToken::new()));
        assert!(conn.mark_open());
        let _ = broadcast.add(conn);
        Harness {
            bus: Arc::new(MemoryBus::new()),
            broadcast,
            echoes: Arc::new(EchoSuppressor::new(&channels(), DEFAULT_ECHO_TTL)),
            rx,
        }
    }

    impl Harness {
        fn bridge(&self) -> BusBridge {
            BusBridge::new(
                self.bus.clone(),
                channels(),
                self.broadcast.clone(),
                self.echoes.clone(),
            )
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
        }

        async fn next_frame(&mut self) -> Value {
            let frame = tokio::time::timeout(TIMEOUT, self.rx.recv())
                .await
                .expect("timed out")
                .expect("queue closed");
            serde_json::from_str(&frame).unwrap()
        }
    }

    #[test]
    fn json_payload_broadcast_as_data() {
        let mut h = harness();
        let handled = h
            .bridge()
            .handle_message(BusMessage::text("gift.events", r#"{"giftName":"Rose"}"#));
        assert!(matches!(handled, Handled::Broadcast(r) if r.delivered == 1));

        let frame: Value = serde_json::from_str(&h.rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["channel"], "gift.events");
        assert_eq!(frame["data"], json!({"giftName": "Rose"}));
        assert!(frame["ts"].is_string());
    }

    #[test]
    fn non_json_payload_passed_through() {
        let mut h = harness();
        let _ = h.bridge().handle_message(BusMessage::text("chat.events", "plain text"));
        let frame: Value = serde_json::from_str(&h.rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"], "plain text");
    }

    #[test]
    fn binary_payload_dropped() {
        let mut h = harness();
        let handled = h
            .bridge()
            .handle_message(BusMessage::from_bytes("chat.events", &[0xff, 0x00]));
        assert_eq!(handled, Handled::Dropped);
        assert!(h.rx.try_recv().is_err());
    }

    #[test]
    fn own_publish_suppressed_once() {
        let mut h = harness();
        let bridge = h.bridge();
        h.echoes.record("chat.events", r#"{"n":1}"#);

        assert_eq!(
            bridge.handle_message(BusMessage::text("chat.events", r#"{"n":1}"#)),
            Handled::Echo
        );
        assert!(h.rx.try_recv().is_err());

        // The same payload from another producer is delivered.
        assert!(matches!(
            bridge.handle_message(BusMessage::text("chat.events", r#"{"n":1}"#)),
            Handled::Broadcast(_)
        ));
        assert!(h.rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn run_forwards_in_bus_order() {
        let mut h = harness();
        let bridge = h.bridge();
        let stream = bridge.subscribe().await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(stream, cancel.clone()));

        for i in 0..5 {
            h.bus.publish("chat.events", &json!({"i": i}).to_string()).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(h.next_frame().await["data"]["i"], i);
        }

        cancel.cancel();
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn resubscribes_after_subscription_lost() {
        let mut h = harness();
        let bridge = h.bridge();
        let stream = bridge.subscribe().await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(stream, cancel.clone()));

        h.bus.set_available(false);
        h.bus.sever_subscriptions();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.bus.set_available(true);

        let deadline = tokio::time::Instant::now() + TIMEOUT;
        while h.bus.subscriber_count() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "bridge never re-subscribed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        h.bus.publish("gift.events", r#"{"after":"reconnect"}"#).await.unwrap();
        assert_eq!(h.next_frame().await["data"]["after"], "reconnect");

        cancel.cancel();
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn publish_while_unsubscribed_does_not_swallow_later_message() {
        let mut h = harness();
        let bridge = h.bridge();
        let stream = bridge.subscribe().await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(stream, cancel.clone()));

        h.bus.set_available(false);
        h.bus.sever_subscriptions();
        // Own publish goes out while nothing is listening, so no echo returns.
        h.echoes.record("chat.events", r#"{"text":"hi"}"#);
        h.bus.set_available(true);
        h.bus.publish("chat.events", r#"{"text":"hi"}"#).await.unwrap();

        let deadline = tokio::time::Instant::now() + TIMEOUT;
        while h.bus.subscriber_count() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "bridge never re-subscribed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Same payload from another relay must reach local clients.
        h.bus.publish("chat.events", r#"{"text":"hi"}"#).await.unwrap();
        assert_eq!(h.next_frame().await["data"]["text"], "hi");

        cancel.cancel();
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_during_backoff_stops_bridge() {
        let h = harness();
        let bridge = h
            .bridge()
            .with_backoff(Duration::from_secs(60), Duration::from_secs(60));
        let stream = bridge.subscribe().await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(stream, cancel.clone()));

        h.bus.sever_subscriptions();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn startup_subscribe_failure_surfaces() {
        let h = harness();
        h.bus.set_available(false);
        assert!(h.bridge().subscribe().await.is_err());
    }
}
