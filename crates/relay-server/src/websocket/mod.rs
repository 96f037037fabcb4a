//! WebSocket connection management, keepalive and fan-out.

pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod session;
