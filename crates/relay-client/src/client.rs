//! HTTP client for `POST /broadcast`.

use std::time::Duration;

use relay_core::PlatformEvent;
use relay_core::channels::channel_for_event_type;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::errors::{ClientError, Result};

/// Endpoints tried when none are configured explicitly, in order.
pub const DEFAULT_ENDPOINTS: [&str; 2] = [
    "http://gateway:3000/broadcast",
    "http://localhost:3000/broadcast",
];

/// Per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how to reach the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayClientConfig {
    /// Full `/broadcast` URLs, tried in order.
    pub endpoints: Vec<String>,
    /// Timeout applied to each request.
    pub timeout: Duration,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|e| (*e).to_owned()).collect(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct BroadcastBody<'a> {
    channel: &'a str,
    message: Value,
}

/// Forwards producer events to the first relay endpoint that accepts them.
pub struct GatewayClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl GatewayClient {
    /// Build a client from `config`.
    pub fn new(config: GatewayClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            client,
            endpoints: config.endpoints,
        })
    }

    /// Configured endpoints.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Forward a normalized platform event.
    pub async fn forward_event(&self, event: &PlatformEvent) -> Result<String> {
        self.forward(event.event_type(), event.payload()?).await
    }

    /// Forward `payload` as an event of `event_type`.
    ///
    /// The relay receives `{channel, message: {type, ...payload}}`; gifts go
    /// to `gift.events`, everything else to `chat.events`. Returns the
    /// endpoint that accepted the event.
    pub async fn forward(&self, event_type: &str, payload: Value) -> Result<String> {
        let Value::Object(fields) = payload else {
            return Err(ClientError::InvalidPayload);
        };
        if self.endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }

        let mut message = Map::with_capacity(fields.len() + 1);
        let _ = message.insert("type".into(), Value::String(event_type.to_owned()));
        message.extend(fields);

        let body = BroadcastBody {
            channel: channel_for_event_type(event_type),
            message: Value::Object(message),
        };

        let mut last_error = String::new();
        for endpoint in &self.endpoints {
            match self.client.post(endpoint).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%endpoint, event_type, channel = body.channel, "event forwarded");
                    return Ok(endpoint.clone());
                }
                Ok(resp) => {
                    last_error = format!("{endpoint}: HTTP {}", resp.status());
                    warn!(%endpoint, status = %resp.status(), "gateway rejected event");
                }
                Err(e) => {
                    last_error = format!("{endpoint}: {e}");
                    warn!(%endpoint, error = %e, "failed to reach gateway");
                }
            }
        }

        error!(event_type, %last_error, "unable to forward event after trying all endpoints");
        Err(ClientError::AllEndpointsFailed {
            attempts: self.endpoints.len(),
            last_error,
        })
    }
}
