//! Gateway client errors.

use thiserror::Error;

/// Errors from forwarding an event.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// The payload is not a JSON object; nothing was sent.
    #[error("event payload must be a JSON object")]
    InvalidPayload,

    /// The event could not be converted to JSON.
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No endpoints are configured.
    #[error("no gateway endpoints configured")]
    NoEndpoints,

    /// Every endpoint was tried and none accepted the event.
    #[error("all {attempts} gateway endpoints failed; last error: {last_error}")]
    AllEndpointsFailed {
        /// Endpoints tried.
        attempts: usize,
        /// Failure reported by the last endpoint.
        last_error: String,
    },
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ClientError>;
