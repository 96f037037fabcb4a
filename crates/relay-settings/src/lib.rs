//! # relay-settings
//!
//! Configuration for the relay, loaded once at startup from three layers
//! (in priority order):
//! 1. **Compiled defaults** — [`RelaySettings::default()`]
//! 2. **Settings file** — optional JSON, deep-merged over defaults
//! 3. **Environment variables** — `PORT`, `REDIS_URL`, `RELAY_*` (highest priority)
//!
//! There is no hot reload; restart the process to pick up changes.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path};
pub use types::*;
