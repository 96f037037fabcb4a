//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake done, greeting queued, not yet registered.
    Connecting = 0,
    /// Registered and receiving broadcasts.
    Open = 1,
    /// Terminal.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Why a frame could not be queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFailure {
    /// Outbound queue is at capacity.
    Full,
    /// Outbound task has gone away.
    Closed,
}

/// Generate a fresh connection id.
pub fn new_connection_id() -> String {
    format!("conn_{}", Uuid::now_v7().simple())
}

/// A connected WebSocket client as seen by the registry and broadcaster.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    tx: mpsc::Sender<Arc<String>>,
    state: AtomicU8,
    close: CancellationToken,
    /// When the connection was established.
    pub connected_at: Instant,
    last_seen: Mutex<Instant>,
}

impl ClientConnection {
    /// Create a connection in [`ConnectionState::Connecting`].
    ///
    /// `close` is cancelled when the connection closes; pass a child of the
    /// shutdown token so shutdown closes every connection.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>, close: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close,
            connected_at: now,
            last_seen: Mutex::new(now),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether broadcasts should be delivered to this connection.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && !self.close.is_cancelled()
    }

    /// Move `Connecting → Open`. Returns `false` if the connection already
    /// left `Connecting`.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closed` and wake everything waiting on [`Self::closed`].
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&self) -> bool {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        self.close.cancel();
        previous != ConnectionState::Closed as u8
    }

    /// Resolves once the connection is closed or the server shuts down.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }

    /// Token cancelled when the connection closes.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Queue a serialized frame without waiting.
    pub fn send(&self, frame: Arc<String>) -> Result<(), SendFailure> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Record inbound activity (Pong or any other frame).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity (or establishment).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
