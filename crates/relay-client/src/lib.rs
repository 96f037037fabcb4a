//! # relay-client
//!
//! Producer-side boundary for pushing normalized events into a relay over
//! `POST /broadcast`, with fallback across several gateway endpoints.

#![deny(unsafe_code)]

pub mod client;
pub mod errors;

pub use client::{GatewayClient, GatewayClientConfig};
pub use errors::{ClientError, Result};
