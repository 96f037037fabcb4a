//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If a settings file was given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use relay_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Load settings from an optional file plus the process environment.
pub fn load_settings(path: Option<&Path>) -> Result<RelaySettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from a specific file plus the process environment.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_settings(Some(path))
}

fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<RelaySettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, lookup);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_env_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("PORT") {
        match parse_u16_range(&v, 0, u16::MAX) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RELAY_HEARTBEAT_INTERVAL_SECS") {
        match parse_u64_range(&v, 1, 3600) {
            Some(secs) => settings.server.heartbeat_interval_secs = secs,
            None => warn!(key = "RELAY_HEARTBEAT_INTERVAL_SECS", value = %v, "invalid u64 env var, ignoring"),
        }
    }
    if let Some(v) = read("RELAY_PONG_TIMEOUT_SECS") {
        match parse_u64_range(&v, 1, 7200) {
            Some(secs) => settings.server.pong_timeout_secs = secs,
            None => warn!(key = "RELAY_PONG_TIMEOUT_SECS", value = %v, "invalid u64 env var, ignoring"),
        }
    }

    // ── Bus ─────────────────────────────────────────────────────────
    if let Some(v) = read("REDIS_URL") {
        settings.bus.url = v;
    }
    if let Some(v) = read("RELAY_CHANNELS") {
        let channels = parse_channel_list(&v);
        if channels.is_empty() {
            warn!(key = "RELAY_CHANNELS", value = %v, "empty channel list env var, ignoring");
        } else {
            settings.bus.channels = channels;
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("RELAY_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(e) => warn!(key = "RELAY_LOG_FORMAT", error = %e, "invalid log format env var, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated channel list, dropping blanks and duplicates.
pub fn parse_channel_list(val: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in val.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|c| c == name) {
            out.push(name.to_owned());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env() -> impl Fn(&str) -> Option<String> {
        env(&[])
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"channels": ["a", "b"]});
        let source = serde_json::json!({"channels": ["c"]});
        assert_eq!(deep_merge(target, source)["channels"], serde_json::json!(["c"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn no_path_returns_defaults() {
        let settings = load_with_env(None, no_env()).unwrap();
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/relay.json");
        let settings = load_with_env(Some(path), no_env()).unwrap();
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(
            &path,
            r#"{"server":{"port":4000},"bus":{"channels":["chat.events"]}}"#,
        )
        .unwrap();

        let settings = load_with_env(Some(&path), no_env()).unwrap();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.bus.channels, vec!["chat.events"]);
        assert_eq!(settings.bus.url, "redis://redis:6379/0");
    }

    #[test]
    fn invalid_json_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_with_env(Some(&path), no_env()).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn wrong_type_in_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"server":{"port":"high"}}"#).unwrap();
        assert!(load_with_env(Some(&path), no_env()).is_err());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"server":{"port":4000}}"#).unwrap();

        let settings = load_with_env(
            Some(&path),
            env(&[("PORT", "5000"), ("REDIS_URL", "redis://localhost:6379/1")]),
        )
        .unwrap();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.bus.url, "redis://localhost:6379/1");
    }

    #[test]
    fn invalid_port_ignored() {
        let mut s = RelaySettings::default();
        apply_env_overrides(&mut s, env(&[("PORT", "99999")]));
        assert_eq!(s.server.port, 3000);
        apply_env_overrides(&mut s, env(&[("PORT", "abc")]));
        assert_eq!(s.server.port, 3000);
    }

    #[test]
    fn empty_env_values_ignored() {
        let mut s = RelaySettings::default();
        apply_env_overrides(&mut s, env(&[("REDIS_URL", ""), ("RELAY_HOST", "  ")]));
        assert_eq!(s, RelaySettings::default());
    }

    #[test]
    fn channel_list_env() {
        let mut s = RelaySettings::default();
        apply_env_overrides(&mut s, env(&[("RELAY_CHANNELS", "chat.events, product.events,,")]));
        assert_eq!(s.bus.channels, vec!["chat.events", "product.events"]);
    }

    #[test]
    fn blank_channel_list_env_ignored() {
        let mut s = RelaySettings::default();
        apply_env_overrides(&mut s, env(&[("RELAY_CHANNELS", " , ,")]));
        assert_eq!(s.bus.channels, vec!["chat.events", "gift.events"]);
    }

    #[test]
    fn logging_env() {
        let mut s = RelaySettings::default();
        apply_env_overrides(
            &mut s,
            env(&[("RELAY_LOG_LEVEL", "debug"), ("RELAY_LOG_FORMAT", "json")]),
        );
        assert_eq!(s.logging.level, "debug");
        assert_eq!(s.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_log_format_ignored() {
        let mut s = RelaySettings::default();
        apply_env_overrides(&mut s, env(&[("RELAY_LOG_FORMAT", "yaml")]));
        assert_eq!(s.logging.format, LogFormat::Compact);
    }

    #[test]
    fn heartbeat_env_range_checked() {
        let mut s = RelaySettings::default();
        apply_env_overrides(
            &mut s,
            env(&[
                ("RELAY_HEARTBEAT_INTERVAL_SECS", "0"),
                ("RELAY_PONG_TIMEOUT_SECS", "45"),
            ]),
        );
        assert_eq!(s.server.heartbeat_interval_secs, 30);
        assert_eq!(s.server.pong_timeout_secs, 45);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range(" 15 ", 1, 60), Some(15));
        assert_eq!(parse_u64_range("-1", 1, 60), None);
    }

    #[test]
    fn channel_list_dedupes() {
        assert_eq!(parse_channel_list("a,b,a"), vec!["a", "b"]);
        assert!(parse_channel_list("").is_empty());
    }
}
