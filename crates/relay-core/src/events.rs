//! Normalized events handed to the relay by platform adapters.
//!
//! Adapters (TikTok and friends) live outside this workspace; they only need
//! to produce one of these and know which channel it belongs on.

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Error as _};
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::channels::channel_for_event_type;

/// A chat message typed by a viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// Viewer handle.
    pub username: String,
    /// Message text.
    pub message: String,
    /// When the platform saw the message.
    pub timestamp: DateTime<Utc>,
}

/// A gift sent by a viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftEvent {
    /// Viewer handle.
    pub username: String,
    /// Platform gift name ("Rose", "Diamond", ...).
    pub gift_name: String,
    /// How many were sent in one go.
    pub amount: u32,
    /// Unit value in platform coins.
    pub value: u32,
    /// When the platform saw the gift.
    pub timestamp: DateTime<Utc>,
}

/// Any event a platform adapter can emit, tagged by `type` on the wire.
///
/// Unknown types deserialize into [`PlatformEvent::Other`] with the remaining
/// fields kept as the payload.
#[derive(Clone, Debug, PartialEq)]
pub enum PlatformEvent {
    /// Viewer chat.
    Chat(ChatEvent),
    /// Viewer gift.
    Gift(GiftEvent),
    /// Automatic reply text produced by a matching rule.
    AutoReply {
        /// Reply to show.
        text: String,
    },
    /// Product to pin on the overlay.
    PinProduct {
        /// Catalog entry as the catalog serializes it.
        product: Value,
    },
    /// Any other producer event type.
    Other {
        /// The `type` tag as sent.
        event_type: String,
        /// Remaining fields.
        payload: Map<String, Value>,
    },
}

impl PlatformEvent {
    /// Producer event type string.
    pub fn event_type(&self) -> &str {
        match self {
            Self::Chat(_) => "chat",
            Self::Gift(_) => "gift",
            Self::AutoReply { .. } => "auto_reply",
            Self::PinProduct { .. } => "pin_product",
            Self::Other { event_type, .. } => event_type.as_str(),
        }
    }

    /// Bus channel the event is published on.
    pub fn channel(&self) -> &'static str {
        channel_for_event_type(self.event_type())
    }

    /// The event body without the `type` tag.
    pub fn payload(&self) -> serde_json::Result<Value> {
        match self {
            Self::Chat(chat) => serde_json::to_value(chat),
            Self::Gift(gift) => serde_json::to_value(gift),
            Self::AutoReply { text } => Ok(serde_json::json!({ "text": text })),
            Self::PinProduct { product } => Ok(serde_json::json!({ "product": product })),
            Self::Other { payload, .. } => Ok(Value::Object(payload.clone())),
        }
    }
}

impl Serialize for PlatformEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = self.payload().map_err(S::Error::custom)?;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.event_type())?;
        if let Value::Object(fields) = &payload {
            for (key, value) in fields.iter().filter(|(key, _)| key.as_str() != "type") {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PlatformEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let Value::Object(mut fields) = Value::deserialize(deserializer)? else {
            return Err(de::Error::custom("platform event must be a JSON object"));
        };
        let event_type = match fields.remove("type") {
            Some(Value::String(event_type)) => event_type,
            Some(_) => return Err(de::Error::custom("event `type` must be a string")),
            None => return Err(de::Error::missing_field("type")),
        };

        Self::from_tagged(event_type, fields).map_err(D::Error::custom)
    }
}

impl PlatformEvent {
    fn from_tagged(event_type: String, mut fields: Map<String, Value>) -> serde_json::Result<Self> {
        let event = match event_type.as_str() {
            "chat" => Self::Chat(from_fields(fields)?),
            "gift" => Self::Gift(from_fields(fields)?),
            "auto_reply" => Self::AutoReply {
                text: take_field(&mut fields, "text")?,
            },
            "pin_product" => Self::PinProduct {
                product: take_field(&mut fields, "product")?,
            },
            _ => Self::Other {
                event_type,
                payload: fields,
            },
        };
        Ok(event)
    }
}

fn from_fields<T: DeserializeOwned>(fields: Map<String, Value>) -> serde_json::Result<T> {
    serde_json::from_value(Value::Object(fields))
}

fn take_field<T: DeserializeOwned>(
    fields: &mut Map<String, Value>,
    name: &'static str,
) -> serde_json::Result<T> {
    let value = fields
        .remove(name)
        .ok_or_else(|| <serde_json::Error as de::Error>::missing_field(name))?;
    serde_json::from_value(value)
}
