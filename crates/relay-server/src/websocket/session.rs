//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use relay_core::Envelope;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::broadcast::BroadcastManager;
use super::connection::ClientConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// How long the outbound task gets to flush a Close frame after the session ends.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session limits taken from [`ServerConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    /// Interval between Ping frames.
    pub heartbeat_interval: Duration,
    /// Close after this long without inbound frames.
    pub pong_timeout: Duration,
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
}

impl From<&ServerConfig> for SessionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            pong_timeout: config.pong_timeout,
            send_queue_capacity: config.send_queue_capacity.max(1),
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Queues the `system` greeting, then opens and registers the connection
/// 2. Forwards queued frames and periodic Pings on a separate task
/// 3. Ignores inbound data frames; any inbound frame counts as liveness
/// 4. Ends on client close, transport error, eviction, keepalive timeout or
///    cancellation of `close`, then deregisters
#[instrument(skip_all, fields(conn_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: String,
    broadcast: Arc<BroadcastManager>,
    limits: SessionLimits,
    close: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(limits.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(connection_id.clone(), send_tx, close));

    match Envelope::system_connected(&connection_id).to_json() {
        Ok(greeting) => {
            let _ = connection.send(Arc::new(greeting));
        }
        Err(e) => warn!(error = %e, "failed to serialize greeting"),
    }

    if !connection.mark_open() {
        debug!("connection closed before it opened");
        return;
    }
    let _ = broadcast.add(connection.clone());
    info!(connections = broadcast.connection_count(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let outbound_conn = connection.clone();
    let heartbeat_interval = limits.heartbeat_interval;
    let mut outbound = tokio::spawn(async move {
        let mut ping = time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
        loop {
            tokio::select! {
                biased;
                () = outbound_conn.closed() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                frame = send_rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.as_str().to_owned().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = outbound_conn.close();
    });

    let heartbeat_conn = connection.clone();
    let pong_timeout = limits.pong_timeout;
    let heartbeat = tokio::spawn(async move {
        let result = run_heartbeat(heartbeat_conn.clone(), heartbeat_interval, pong_timeout).await;
        if result == HeartbeatResult::TimedOut {
            warn!(conn_id = %heartbeat_conn.id, "client unresponsive for {pong_timeout:?}, disconnecting");
            let _ = heartbeat_conn.close();
        }
    });

    loop {
        tokio::select! {
            () = connection.closed() => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Close(_))) => {
                    debug!("client sent close frame");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.mark_alive(),
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    connection.mark_alive();
                    debug!("ignoring inbound data frame");
                }
                Some(Err(e)) => {
                    debug!(error = %e, "websocket receive error");
                    break;
                }
                None => break,
            },
        }
    }

    let _ = connection.close();
    let _ = broadcast.remove(&connection_id);
    if time::timeout(CLOSE_FLUSH_TIMEOUT, &mut outbound).await.is_err() {
        outbound.abort();
    }
    let _ = heartbeat.await;

    info!(age_secs = connection.age().as_secs(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
}
