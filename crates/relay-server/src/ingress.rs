//! `POST /broadcast`: externally triggered publishes.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use relay_core::Envelope;
use relay_core::channels::DEFAULT_CHANNEL;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::metrics::RELAY_INGRESS_REJECTED_TOTAL;
use crate::publisher::BusPublisher;
use crate::server::AppState;
use crate::websocket::broadcast::{BroadcastManager, DeliveryReport};

/// Rejected publish request. Always a client error, never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngressError {
    /// `message` absent or `null`.
    #[error("Missing message")]
    MissingMessage,
    /// `message` is a scalar.
    #[error("message must be a JSON object or array")]
    InvalidMessage,
    /// `channel` present but not a string.
    #[error("channel must be a string")]
    InvalidChannel,
    /// Body is not a JSON object.
    #[error("request body must be a JSON object")]
    InvalidBody,
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        counter!(RELAY_INGRESS_REJECTED_TOTAL).increment(1);
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A validated publish request.
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastRequest {
    /// Target channel, defaulted when the caller gave none.
    pub channel: String,
    /// Producer payload (object or array).
    pub message: Value,
}

impl BroadcastRequest {
    /// Validate a channel/message pair.
    ///
    /// A missing, `null` or empty channel becomes `chat.events`.
    pub fn new(channel: Option<&str>, message: Option<Value>) -> Result<Self, IngressError> {
        let message = match message {
            None | Some(Value::Null) => return Err(IngressError::MissingMessage),
            Some(message @ (Value::Object(_) | Value::Array(_))) => message,
            Some(_) => return Err(IngressError::InvalidMessage),
        };
        let channel = match channel {
            Some(channel) if !channel.is_empty() => channel.to_owned(),
            _ => DEFAULT_CHANNEL.to_owned(),
        };
        Ok(Self { channel, message })
    }

    /// Parse and validate a raw request body.
    ///
    /// An empty body reads as `{}`, so it fails with `Missing message`.
    pub fn from_body(body: &[u8]) -> Result<Self, IngressError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(IngressError::MissingMessage);
        }
        let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(body) else {
            return Err(IngressError::InvalidBody);
        };
        let channel = match fields.remove("channel") {
            None | Some(Value::Null) => None,
            Some(Value::String(channel)) => Some(channel),
            Some(_) => return Err(IngressError::InvalidChannel),
        };
        Self::new(channel.as_deref(), fields.remove("message"))
    }
}

/// Local broadcast plus bus publish for validated requests.
pub struct Ingress {
    broadcast: Arc<BroadcastManager>,
    publisher: BusPublisher,
}

impl Ingress {
    /// Create the ingress path.
    pub fn new(broadcast: Arc<BroadcastManager>, publisher: BusPublisher) -> Self {
        Self {
            broadcast,
            publisher,
        }
    }

    /// Broadcast to local clients first, then queue the bus publish of the
    /// raw message. The bus outcome never affects the result.
    pub fn handle_broadcast_request(&self, request: BroadcastRequest) -> DeliveryReport {
        let BroadcastRequest { channel, message } = request;
        let payload = message.to_string();
        let envelope = Envelope::new(channel.clone(), message);
        let report = self.broadcast.broadcast(&envelope);
        self.publisher.publish(channel, payload);
        report
    }
}

/// POST /broadcast
pub async fn broadcast_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), IngressError> {
    let request = BroadcastRequest::from_body(&body).inspect_err(|e| {
        debug!(error = %e, "rejected broadcast request");
    })?;
    let channel = request.channel.clone();
    let report = state.ingress.handle_broadcast_request(request);
    info!(%channel, recipients = report.delivered, "ingress broadcast");
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "broadcasted" }))))
}
