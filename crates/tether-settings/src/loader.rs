//! Settings loading: compiled defaults, then `~/.tether/settings.json`
//! deep-merged over them, then `TETHER_*` environment overrides.
//!
//! Merge rules: objects merge recursively, arrays and primitives are
//! replaced, nulls in the user file are skipped.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{LogFormat, TetherSettings};

/// `~/.tether/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from a specific file with env overrides applied. A missing file
/// yields defaults; malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

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

pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Values that fail to parse or fall
/// outside their range are ignored with a warning.
pub fn apply_overrides_with(settings: &mut TetherSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("TETHER_ATTACHMENTS_DIR") {
        settings.attachments.temp_dir = PathBuf::from(v);
    }

    if let Some(v) = env.u64("TETHER_STOP_TIMEOUT_MS", 100, 600_000) {
        settings.process.stop_timeout_ms = v;
    }
    if let Some(v) = env.string("TETHER_CONTAINER_RUNTIME") {
        settings.process.container_runtime = v;
    }
    if let Some(v) = env.string("TETHER_CONTAINER_PREFIX") {
        settings.process.container_prefix = v;
    }
    if let Some(v) = env.string("TETHER_VOLUME_PREFIX") {
        settings.process.volume_prefix = v;
    }

    if let Some(v) = env.usize("TETHER_MAX_LOG_ENTRIES", 1, 100_000) {
        settings.logs.max_entries_per_app = v;
    }

    if let Some(v) = env.bool("TETHER_AUTO_FIX_PROBLEMS") {
        settings.chat.auto_fix_problems = v;
    }

    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.telemetry.level = v;
    }
    if let Some(v) = env.string("TETHER_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.telemetry.format = format,
            None => tracing::warn!(key = "TETHER_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
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

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "compact" | "pretty" | "text" => Some(LogFormat::Compact),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.raw(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
