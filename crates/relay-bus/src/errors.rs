//! Bus error types.

use thiserror::Error;

/// Errors raised by a [`MessageBus`](crate::MessageBus) backend.
#[derive(Debug, Error)]
pub enum BusError {
    /// Redis connection or command failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The bus is not reachable right now.
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
