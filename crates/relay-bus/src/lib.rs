//! # relay-bus
//!
//! The shared publish/subscribe bus that carries events between relay
//! processes.
//!
//! - [`MessageBus`]: publish one payload, or open a subscription stream
//! - [`RedisBus`]: Redis pub/sub with separate publish and subscribe connections
//! - [`MemoryBus`]: in-process bus for single-process deployments and tests

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod message;
pub mod redis_pubsub;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use errors::{BusError, Result};
pub use memory::MemoryBus;
pub use message::{BusMessage, BusPayload};
pub use redis_pubsub::RedisBus;

/// Stream of messages from a subscription. Ends when the subscription is lost.
pub type BusStream = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// A publish/subscribe transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Short backend name for logs (`"redis"`, `"memory"`).
    fn backend(&self) -> &'static str;

    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to `channels`. The returned stream yields every message
    /// received on any of them, in bus delivery order per channel.
    async fn subscribe(&self, channels: &[String]) -> Result<BusStream>;
}
