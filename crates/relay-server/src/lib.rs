//! # relay-server
//!
//! Axum HTTP + `WebSocket` relay.
//!
//! - `WebSocket` at `/` and `/ws`: system greeting, then every broadcast envelope
//! - `POST /broadcast`: local fan-out first, then a fire-and-forget bus publish
//! - Bus bridge: subscription → envelope → fan-out, with re-subscribe and echo suppression
//! - `GET /health`, `GET /metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod echo;
pub mod health;
pub mod ingress;
pub mod metrics;
pub mod publisher;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::RelayServer;
