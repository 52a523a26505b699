//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `RELAY_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Env var naming an explicit settings file.
pub const CONFIG_ENV: &str = "RELAY_CONFIG";

/// Resolve the settings file: `RELAY_CONFIG`, else `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    settings_path_with(|key| std::env::var(key).ok())
}

/// [`settings_path`] with an injectable environment.
pub fn settings_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(explicit) = env(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }
    let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid final value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_settings_with_env(path, |key| std::env::var(key).ok())
}

/// [`load_settings_from_path`] with an injectable environment.
pub fn load_settings_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
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

/// Apply `RELAY_*` overrides read through `env`.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Anything else is
/// logged and ignored.
pub fn apply_overrides(settings: &mut RelaySettings, env: impl Fn(&str) -> Option<String>) {
    let reader = EnvReader { env: &env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = reader.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = reader.u16("RELAY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = reader.usize("RELAY_MAX_MESSAGE_SIZE", 1024, 16 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = reader.usize("RELAY_SEND_QUEUE_CAPACITY", 1, 65_536) {
        settings.server.send_queue_capacity = v;
    }
    if let Some(v) = reader.usize("RELAY_COMMAND_QUEUE_CAPACITY", 1, 1_048_576) {
        settings.server.command_queue_capacity = v;
    }
    if let Some(v) = reader.u64("RELAY_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = reader.u64("RELAY_HEARTBEAT_TIMEOUT_SECS", 1, 86_400) {
        settings.server.heartbeat_timeout_secs = v;
    }

    // ── Sessions ────────────────────────────────────────────────────
    if let Some(v) = reader.u64("RELAY_SESSION_MAX_AGE_SECS", 1, 7 * 86_400) {
        settings.sessions.max_age_secs = v;
    }
    if let Some(v) = reader.u64("RELAY_COMPLETED_GRACE_SECS", 0, 86_400) {
        settings.sessions.completed_grace_secs = v;
    }
    if let Some(v) = reader.u64("RELAY_SWEEP_INTERVAL_SECS", 1, 3600) {
        settings.sessions.sweep_interval_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = reader.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = reader.bool("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    env: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.env)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8787, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── settings_path ───────────────────────────────────────────────

    #[test]
    fn path_prefers_relay_config() {
        let path = settings_path_with(env_of(&[("RELAY_CONFIG", "/etc/relay.json"), ("HOME", "/home/u")]));
        assert_eq!(path, PathBuf::from("/etc/relay.json"));
    }

    #[test]
    fn path_defaults_under_home() {
        let path = settings_path_with(env_of(&[("HOME", "/home/u")]));
        assert_eq!(path, PathBuf::from("/home/u/.relay/settings.json"));
    }

    // ── load ────────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_with_env(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9090}, "sessions": {"maxAgeSecs": 600}}"#).unwrap();

        let settings = load_settings_with_env(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.sessions.max_age_secs, 600);
        assert_eq!(settings.sessions.completed_grace_secs, 30);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert_matches!(load_settings_with_env(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"sessions": {"sweepIntervalSecs": 0}}"#).unwrap();

        assert_matches!(
            load_settings_with_env(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn env_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9090}}"#).unwrap();

        let settings = load_settings_with_env(&path, env_of(&[("RELAY_PORT", "7000")])).unwrap();
        assert_eq!(settings.server.port, 7000);
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn overrides_apply_every_section() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            env_of(&[
                ("RELAY_HOST", "127.0.0.1"),
                ("RELAY_SESSION_MAX_AGE_SECS", "120"),
                ("RELAY_COMPLETED_GRACE_SECS", "5"),
                ("RELAY_SWEEP_INTERVAL_SECS", "2"),
                ("RELAY_LOG_LEVEL", "debug"),
                ("RELAY_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.sessions.max_age_secs, 120);
        assert_eq!(settings.sessions.completed_grace_secs, 5);
        assert_eq!(settings.sessions.sweep_interval_secs, 2);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            env_of(&[
                ("RELAY_PORT", "0"),
                ("RELAY_SWEEP_INTERVAL_SECS", "soon"),
                ("RELAY_LOG_JSON", "maybe"),
                ("RELAY_HOST", ""),
            ]),
        );
        assert_eq!(settings, RelaySettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8787", 1, 65535), Some(8787));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("60", 1, 3600), Some(60));
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_usize_range("256", 1, 1024), Some(256));
    }
}
