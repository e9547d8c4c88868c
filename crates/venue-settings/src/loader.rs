//! Settings loading: compiled defaults, then the JSON file deep-merged on
//! top, then `VENUE_*` environment variables.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use venue_core::SceneIndex;

use crate::errors::Result;
use crate::types::VenueSettings;

/// Settings file location: `$VENUE_CONFIG`, else `./venue.json`.
pub fn settings_path() -> PathBuf {
    std::env::var("VENUE_CONFIG")
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("venue.json"), PathBuf::from)
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults; an unreadable or invalid one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<VenueSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<VenueSettings> {
    let defaults = serde_json::to_value(VenueSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive merge: objects merge per key, everything else is replaced by
/// `source`, and nulls in `source` leave `target` untouched.
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

pub fn apply_env_overrides(settings: &mut VenueSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides from any key lookup. Invalid values are logged and skipped.
pub fn apply_overrides(settings: &mut VenueSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = read("VENUE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("VENUE_PORT").and_then(|v| checked("VENUE_PORT", &v, parse_u16_range(&v, 1, 65535))) {
        settings.server.port = v;
    }
    if let Some(v) = read("VENUE_MAX_SEND_QUEUE")
        .and_then(|v| checked("VENUE_MAX_SEND_QUEUE", &v, parse_usize_range(&v, 1, 65_536)))
    {
        settings.server.max_send_queue = v;
    }
    if let Some(v) = read("VENUE_UPLOAD_DIR") {
        settings.storage.upload_dir = PathBuf::from(v);
    }
    if let Some(v) = read("VENUE_DATABASE") {
        settings.storage.database_path = PathBuf::from(v);
    }
    if let Some(v) = read("VENUE_MAX_UPLOAD_BYTES")
        .and_then(|v| checked("VENUE_MAX_UPLOAD_BYTES", &v, parse_usize_range(&v, 1, 1 << 30)))
    {
        settings.uploads.max_bytes = v;
    }
    if let Some(v) = read("VENUE_INITIAL_SCENE") {
        settings.scene.initial = v.parse::<SceneIndex>().ok();
    }
    if let Some(v) = read("VENUE_OPERATOR_TOKEN") {
        settings.operator.token = Some(v);
    }
    if let Some(v) = read("VENUE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("VENUE_LOG_JSON").and_then(|v| checked("VENUE_LOG_JSON", &v, parse_bool(&v))) {
        settings.logging.json = v;
    }
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env override, ignoring");
    }
    parsed
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
