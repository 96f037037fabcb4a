//! The delivery envelope.
//!
//! Every frame a client receives is an [`Envelope`] serialized as
//! `{"channel": .., "data": .., "ts": ..}`. Producers never see their payload
//! forwarded bare.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::channels::SYSTEM_CHANNEL;

/// A normalized event ready for fan-out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Channel the event belongs to (`chat.events`, `gift.events`, `system`, or ad-hoc).
    pub channel: String,
    /// Opaque producer payload.
    pub data: Value,
    /// ISO-8601 time this relay built the envelope.
    #[serde(rename = "ts")]
    pub timestamp: String,
}

impl Envelope {
    /// Wrap `data` for `channel`, stamped with the current time.
    pub fn new(channel: impl Into<String>, data: Value) -> Self {
        Self::with_timestamp(channel, data, now_timestamp())
    }

    /// Wrap `data` with an explicit timestamp.
    pub fn with_timestamp(
        channel: impl Into<String>,
        data: Value,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            data,
            timestamp: timestamp.into(),
        }
    }

    /// The greeting queued on every new connection before anything else.
    pub fn system_connected(connection_id: &str) -> Self {
        Self::new(
            SYSTEM_CHANNEL,
            json!({
                "message": "Connected to gateway",
                "connectionId": connection_id,
            }),
        )
    }

    /// Build an envelope from a raw message received on a bus channel.
    ///
    /// The payload is parsed as JSON and becomes `data` as-is, whatever its
    /// shape; anything that does not parse is passed through as a JSON string.
    pub fn from_bus_payload(channel: &str, payload: &str) -> Self {
        let data = serde_json::from_str::<Value>(payload)
            .unwrap_or_else(|_| Value::String(payload.to_owned()));
        Self::new(channel, data)
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Current UTC time with millisecond precision and a `Z` suffix.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
