//! Raw messages as they come off the bus.

/// Payload of a bus message before any interpretation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusPayload {
    /// UTF-8 text (JSON or otherwise).
    Text(String),
    /// Bytes that are not valid UTF-8.
    Binary(Vec<u8>),
}

/// One message received on a subscribed channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Raw payload.
    pub payload: BusPayload,
}

impl BusMessage {
    /// A text message.
    pub fn text(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: BusPayload::Text(payload.into()),
        }
    }

    /// Classify raw bytes as text or binary.
    pub fn from_bytes(channel: impl Into<String>, bytes: &[u8]) -> Self {
        let payload = match std::str::from_utf8(bytes) {
            Ok(s) => BusPayload::Text(s.to_owned()),
            Err(_) => BusPayload::Binary(bytes.to_vec()),
        };
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match &self.payload {
            BusPayload::Text(s) => s.len(),
            BusPayload::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
