//! Redis pub/sub backend.
//!
//! A subscribed Redis connection cannot issue ordinary commands, so the bus
//! keeps two handles: a [`ConnectionManager`] for `PUBLISH` (reconnects on its
//! own) and a dedicated pub/sub connection opened per [`subscribe`] call.
//!
//! [`subscribe`]: crate::MessageBus::subscribe

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::errors::Result;
use crate::message::BusMessage;
use crate::{BusStream, MessageBus};

/// Redis-backed [`MessageBus`].
pub struct RedisBus {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    /// Connect the publishing handle. Fails if Redis is unreachable.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., `redis://localhost:6379/0`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        info!(url = %redact_url(url), "connected to Redis");

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!(channel, receivers, "published to Redis");
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<BusStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel.as_str()).await?;
        }
        info!(?channels, "subscribed to Redis channels");

        let stream = pubsub
            .into_on_message()
            .map(|msg| BusMessage::from_bytes(msg.get_channel_name(), msg.get_payload_bytes()));
        Ok(Box::pin(stream))
    }
}

/// Strip the password from a Redis URL before logging it.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_owned();
    };
    match rest.rsplit_once('@') {
        Some((userinfo, host)) => {
            let user = userinfo.split(':').next().unwrap_or_default();
            if user.is_empty() {
                format!("{scheme}://***@{host}")
            } else {
                format!("{scheme}://{user}:***@{host}")
            }
        }
        None => url.to_owned(),
    }
}
