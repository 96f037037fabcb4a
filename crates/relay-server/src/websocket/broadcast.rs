//! Connection registry and envelope fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use relay_core::Envelope;
use tracing::{debug, warn};

use super::connection::{ClientConnection, SendFailure};
use crate::metrics::{RELAY_BROADCASTS_TOTAL, WS_EVICTIONS_TOTAL};

/// Outcome of one [`BroadcastManager::broadcast`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Registered connections that were not open.
    pub skipped: usize,
    /// Connections closed and removed because their queue was full or closed.
    pub evicted: usize,
}

/// Owns the set of registered connections and delivers envelopes to them.
///
/// Critical sections never await, so `broadcast` can be called from any
/// task, sync or async.
pub struct BroadcastManager {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl BroadcastManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection. Returns `false` if the id was already present.
    pub fn add(&self, connection: Arc<ClientConnection>) -> bool {
        let mut conns = self.connections.write();
        if conns.contains_key(&connection.id) {
            return false;
        }
        let _ = conns.insert(connection.id.clone(), connection);
        true
    }

    /// Deregister a connection. Absent ids are a no-op returning `None`.
    pub fn remove(&self, connection_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.write().remove(connection_id)
    }

    /// Whether a connection is registered.
    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().contains_key(connection_id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Queue `envelope` on every open connection.
    ///
    /// Serializes once. Never waits on a client and never fails; connections
    /// that cannot take the frame are evicted.
    pub fn broadcast(&self, envelope: &Envelope) -> DeliveryReport {
        let frame = match envelope.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(channel = %envelope.channel, error = %e, "failed to serialize envelope");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        let mut evict = Vec::new();
        {
            let conns = self.connections.read();
            for conn in conns.values() {
                if !conn.is_open() {
                    report.skipped += 1;
                    continue;
                }
                match conn.send(Arc::clone(&frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(failure) => evict.push((Arc::clone(conn), failure)),
                }
            }
        }

        for (conn, failure) in evict {
            let reason = match failure {
                SendFailure::Full => "queue full",
                SendFailure::Closed => "queue closed",
            };
            warn!(conn_id = %conn.id, reason, "evicting client");
            let _ = conn.close();
            if self.remove(&conn.id).is_some() {
                report.evicted += 1;
                counter!(WS_EVICTIONS_TOTAL).increment(1);
            }
        }

        counter!(RELAY_BROADCASTS_TOTAL, "channel" => envelope.channel.clone()).increment(1);
        debug!(
            channel = %envelope.channel,
            recipients = report.delivered,
            skipped = report.skipped,
            evicted = report.evicted,
            "broadcast envelope"
        );
        report
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}
