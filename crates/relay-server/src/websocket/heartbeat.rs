//! Keepalive monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Nothing was heard from the client within the timeout window.
    TimedOut,
    /// The connection closed for another reason.
    Closed,
}

/// Watch a connection until it goes quiet for longer than `timeout` or closes.
///
/// Checked every `interval`; the outbound task sends the Ping frames, this
/// only reads the connection's last-seen time.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let mut check = time::interval_at(time::Instant::now() + interval, interval);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = connection.closed() => return HeartbeatResult::Closed,
            _ = check.tick() => {
                if connection.idle_for() > timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn make_connection() -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(ClientConnection::new("hb_conn".into(), tx, CancellationToken::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let conn = make_connection();
        let result = run_heartbeat(conn, Duration::from_secs(30), Duration::from_secs(60)).await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_not_early() {
        let conn = make_connection();
        let start = time::Instant::now();
        let _ = run_heartbeat(conn, Duration::from_secs(30), Duration::from_secs(60)).await;
        assert!(start.elapsed() > Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn active_client_stays_alive() {
        let conn = make_connection();
        let handle = tokio::spawn(run_heartbeat(
            conn.clone(),
            Duration::from_secs(1),
            Duration::from_secs(3),
        ));

        for _ in 0..10 {
            time::sleep(Duration::from_secs(1)).await;
            conn.mark_alive();
        }
        assert!(!handle.is_finished());

        let _ = conn.close();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Closed);
    }

    #[tokio::test]
    async fn close_ends_heartbeat() {
        let conn = make_connection();
        let _ = conn.close();
        let result = run_heartbeat(conn, Duration::from_secs(100), Duration::from_secs(300)).await;
        assert_eq!(result, HeartbeatResult::Closed);
    }
}
