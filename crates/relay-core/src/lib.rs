//! # relay-core
//!
//! Shared types for the live event relay.
//!
//! - [`Envelope`]: the `{channel, data, ts}` unit pushed to every client
//! - [`channels`]: well-known bus channel names and event type routing
//! - [`events`]: normalized chat/gift events produced by platform adapters
//! - [`logging`]: `tracing` subscriber setup shared by every binary

#![deny(unsafe_code)]

pub mod channels;
pub mod envelope;
pub mod events;
pub mod logging;

pub use envelope::{Envelope, now_timestamp};
pub use events::{ChatEvent, GiftEvent, PlatformEvent};
