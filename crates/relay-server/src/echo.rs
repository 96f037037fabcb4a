//! Suppression of this process's own publishes coming back off the bus.
//!
//! Ingress broadcasts locally and then publishes to the bus. When the
//! publish goes to a channel this process subscribes to, the bus delivers
//! it back; without suppression every local client would see it twice.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Default lifetime of a recorded publish.
pub const DEFAULT_ECHO_TTL: Duration = Duration::from_secs(10);

/// Upper bound on outstanding records; the oldest are dropped past it.
const MAX_PENDING: usize = 4096;

struct Pending {
    channel: String,
    payload: String,
    at: Instant,
}

/// Remembers recent own publishes on subscribed channels.
pub struct EchoSuppressor {
    subscribed: HashSet<String>,
    ttl: Duration,
    pending: Mutex<VecDeque<Pending>>,
}

impl EchoSuppressor {
    /// Track publishes on `subscribed` channels for `ttl`.
    pub fn new(subscribed: &[String], ttl: Duration) -> Self {
        Self {
            subscribed: subscribed.iter().cloned().collect(),
            ttl,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Note a publish about to go out. Ignored for channels not subscribed.
    pub fn record(&self, channel: &str, payload: &str) {
        if !self.subscribed.contains(channel) {
            return;
        }
        let mut pending = self.pending.lock();
        self.expire(&mut pending);
        if pending.len() >= MAX_PENDING {
            let _ = pending.pop_front();
        }
        pending.push_back(Pending {
            channel: channel.to_owned(),
            payload: payload.to_owned(),
            at: Instant::now(),
        });
    }

    /// Withdraw a record whose publish failed.
    pub fn forget(&self, channel: &str, payload: &str) {
        let _ = self.take(channel, payload);
    }

    /// If this message is an echo of an own publish, consume the record and
    /// return `true`.
    pub fn take(&self, channel: &str, payload: &str) -> bool {
        let mut pending = self.pending.lock();
        self.expire(&mut pending);
        match pending
            .iter()
            .position(|p| p.channel == channel && p.payload == payload)
        {
            Some(index) => {
                let _ = pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop every outstanding record and return how many there were.
    ///
    /// Called when the subscription goes away: anything published while it
    /// was down will never come back, and a stale record would swallow the
    /// next identical message from another producer.
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let discarded = pending.len();
        pending.clear();
        discarded
    }

    /// Outstanding records.
    pub fn pending(&self) -> usize {
        let mut pending = self.pending.lock();
        self.expire(&mut pending);
        pending.len()
    }

    fn expire(&self, pending: &mut VecDeque<Pending>) {
        while pending.front().is_some_and(|p| p.at.elapsed() > self.ttl) {
            let _ = pending.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suppressor() -> EchoSuppressor {
        EchoSuppressor::new(&["chat.events".to_owned()], DEFAULT_ECHO_TTL)
    }

    #[test]
    fn recorded_publish_is_taken_once() {
        let echoes = suppressor();
        echoes.record("chat.events", r#"{"a":1}"#);
        assert!(echoes.take("chat.events", r#"{"a":1}"#));
        assert!(!echoes.take("chat.events", r#"{"a":1}"#));
    }

    #[test]
    fn unsubscribed_channel_not_recorded() {
        let echoes = suppressor();
        echoes.record("ad.hoc", "x");
        assert_eq!(echoes.pending(), 0);
        assert!(!echoes.take("ad.hoc", "x"));
    }

    #[test]
    fn payload_and_channel_must_match() {
        let echoes = suppressor();
        echoes.record("chat.events", "x");
        assert!(!echoes.take("chat.events", "y"));
        assert!(!echoes.take("gift.events", "x"));
        assert_eq!(echoes.pending(), 1);
    }

    #[test]
    fn duplicate_publishes_counted() {
        let echoes = suppressor();
        echoes.record("chat.events", "x");
        echoes.record("chat.events", "x");
        assert!(echoes.take("chat.events", "x"));
        assert!(echoes.take("chat.events", "x"));
        assert!(!echoes.take("chat.events", "x"));
    }

    #[test]
    fn forget_withdraws_record() {
        let echoes = suppressor();
        echoes.record("chat.events", "x");
        echoes.forget("chat.events", "x");
        assert_eq!(echoes.pending(), 0);
    }

    #[test]
    fn clear_discards_everything() {
        let echoes = suppressor();
        echoes.record("chat.events", "x");
        echoes.record("chat.events", "y");
        assert_eq!(echoes.clear(), 2);
        assert_eq!(echoes.pending(), 0);
        assert!(!echoes.take("chat.events", "x"));
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire() {
        let echoes = EchoSuppressor::new(&["chat.events".to_owned()], Duration::from_secs(1));
        echoes.record("chat.events", "x");
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!echoes.take("chat.events", "x"));
    }

    #[test]
    fn bounded() {
        let echoes = suppressor();
        for i in 0..MAX_PENDING + 10 {
            echoes.record("chat.events", &i.to_string());
        }
        assert_eq!(echoes.pending(), MAX_PENDING);
        assert!(!echoes.take("chat.events", "0"));
    }
}
