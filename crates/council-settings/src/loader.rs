//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use council_core::{AdvisorId, FailurePolicy};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::CouncilSettings;

/// `~/.council/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".council").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CouncilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults; invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<CouncilSettings> {
    let defaults = serde_json::to_value(CouncilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CouncilSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `COUNCIL_*` overrides read through `lookup`.
///
/// Values that fail to parse are ignored with a warning.
pub fn apply_overrides(settings: &mut CouncilSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

    for advisor in AdvisorId::ALL {
        let prefix = match advisor {
            AdvisorId::A => "COUNCIL_ADVISOR_A",
            AdvisorId::B => "COUNCIL_ADVISOR_B",
        };
        if let Some(v) = read(format!("{prefix}_URL").as_str()) {
            settings.advisors.get_mut(advisor).endpoint = v;
        }
        if let Some(v) = read(format!("{prefix}_LABEL").as_str()) {
            settings.advisors.get_mut(advisor).label = v;
        }
    }

    if let Some(v) = read("COUNCIL_TURN_TIMEOUT_MS") {
        match parse_u64_range(&v, 0, 3_600_000) {
            Some(0) => settings.turn.timeout_ms = None,
            Some(ms) => settings.turn.timeout_ms = Some(ms),
            None => invalid("COUNCIL_TURN_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("COUNCIL_IDLE_TIMEOUT_MS") {
        match parse_u64_range(&v, 100, 3_600_000) {
            Some(ms) => settings.stream.idle_timeout_ms = ms,
            None => invalid("COUNCIL_IDLE_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("COUNCIL_CONNECT_TIMEOUT_MS") {
        match parse_u64_range(&v, 100, 600_000) {
            Some(ms) => settings.stream.connect_timeout_ms = ms,
            None => invalid("COUNCIL_CONNECT_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("COUNCIL_FAILURE_POLICY") {
        match parse_failure_policy(&v) {
            Some(policy) => settings.turn.failure_policy = policy,
            None => invalid("COUNCIL_FAILURE_POLICY", &v),
        }
    }
    if let Some(v) = read("COUNCIL_ALLOW_CONCURRENT_TURNS") {
        match parse_bool(&v) {
            Some(b) => settings.turn.allow_concurrent_turns = b,
            None => invalid("COUNCIL_ALLOW_CONCURRENT_TURNS", &v),
        }
    }
    if let Some(v) = read("COUNCIL_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("COUNCIL_PORT") {
        match v.parse::<u16>().ok().filter(|p| *p > 0) {
            Some(port) => settings.server.port = port,
            None => invalid("COUNCIL_PORT", &v),
        }
    }
    if let Some(v) = read("COUNCIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("COUNCIL_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => invalid("COUNCIL_LOG_JSON", &v),
        }
    }
}

fn invalid(key: &str, value: &str) {
    warn!(key, value, "invalid env override, ignoring");
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_failure_policy(val: &str) -> Option<FailurePolicy> {
    match val.to_lowercase().as_str() {
        "discard" => Some(FailurePolicy::Discard),
        "retain" => Some(FailurePolicy::Retain),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_skips_nulls() {
        let target = serde_json::json!({"a": 1});
        let merged = deep_merge(target, serde_json::json!({"a": null, "b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn overrides_endpoints_and_labels() {
        let mut s = CouncilSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("COUNCIL_ADVISOR_A_URL", "http://angel:8000/stream"),
                ("COUNCIL_ADVISOR_B_LABEL", "Devil"),
            ]),
        );
        assert_eq!(s.advisors.a.endpoint, "http://angel:8000/stream");
        assert_eq!(s.advisors.b.label, "Devil");
        assert_eq!(s.advisors.b.endpoint, "http://localhost:5000/unhinged");
    }

    #[test]
    fn turn_timeout_zero_disables() {
        let mut s = CouncilSettings::default();
        apply_overrides(&mut s, env(&[("COUNCIL_TURN_TIMEOUT_MS", "2000")]));
        assert_eq!(s.turn.timeout(), Some(Duration::from_millis(2000)));
        apply_overrides(&mut s, env(&[("COUNCIL_TURN_TIMEOUT_MS", "0")]));
        assert_eq!(s.turn.timeout(), None);
    }

    #[test]
    fn invalid_values_are_ignored() {
        let mut s = CouncilSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("COUNCIL_PORT", "not-a-port"),
                ("COUNCIL_IDLE_TIMEOUT_MS", "5"),
                ("COUNCIL_FAILURE_POLICY", "shred"),
                ("COUNCIL_ALLOW_CONCURRENT_TURNS", "maybe"),
            ]),
        );
        assert_eq!(s, CouncilSettings::default());
    }

    #[test]
    fn policy_and_flags() {
        let mut s = CouncilSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("COUNCIL_FAILURE_POLICY", "RETAIN"),
                ("COUNCIL_ALLOW_CONCURRENT_TURNS", "yes"),
                ("COUNCIL_LOG_JSON", "on"),
                ("COUNCIL_PORT", "8088"),
            ]),
        );
        assert_eq!(s.turn.failure_policy, FailurePolicy::Retain);
        assert!(s.turn.allow_concurrent_turns);
        assert!(s.logging.json);
        assert_eq!(s.server.port, 8088);
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s.advisors, CouncilSettings::default().advisors);
    }

    #[test]
    fn load_merges_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"advisors": {"b": {"endpoint": "https://devil.example/stream", "format": "plain_text"}}}"#,
        )
        .unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.advisors.b.endpoint, "https://devil.example/stream");
        assert_eq!(s.advisors.b.format, council_core::FrameFormat::PlainText);
        assert_eq!(s.advisors.b.label, "Unhinged");
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings_from_path(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_rejects_invalid_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"advisors": {"a": {"endpoint": "localhost:5000"}}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }
}
