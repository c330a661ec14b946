//! Settings loading: defaults, then file, then environment.
//!
//! The file must hold one flat JSON object. Each known key replaces its
//! default; `null` keeps the default and unknown keys are logged and dropped.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::StoreSettings;

/// `~/.cashy/settings.json`, or under `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".cashy").join("settings.json")
}

/// Load from [`settings_path`] and apply environment overrides.
pub fn load_settings() -> Result<StoreSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` and apply environment overrides.
///
/// A missing file yields defaults; an unreadable or malformed one is an error.
/// The result is validated before it is returned.
pub fn load_settings_from_path(path: &Path) -> Result<StoreSettings> {
    let defaults = serde_json::to_value(StoreSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let file: Value = serde_json::from_str(&content)?;
        overlay_file(defaults, file)?
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: StoreSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Lay the keys of a settings file over `defaults`.
pub fn overlay_file(defaults: Value, file: Value) -> Result<Value> {
    let Value::Object(mut merged) = defaults else {
        return Err(SettingsError::InvalidValue("defaults are not an object".into()));
    };
    let Value::Object(entries) = file else {
        return Err(SettingsError::InvalidValue(
            "settings file must hold a JSON object".into(),
        ));
    };

    for (key, value) in entries {
        if value.is_null() {
            continue;
        }
        match merged.get_mut(&key) {
            Some(slot) => *slot = value,
            None => warn!(key = %key, "unknown settings key, ignoring"),
        }
    }
    Ok(Value::Object(merged))
}

/// Apply `CASHY_*` environment variables.
pub fn apply_env_overrides(settings: &mut StoreSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Unparseable values are logged and
/// skipped.
pub fn apply_overrides<F>(settings: &mut StoreSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("CASHY_DB_FILE").filter(|v| !v.is_empty()) {
        settings.file = v;
    }
    if let Some(v) = read_with(&lookup, "CASHY_DB_CREATE", parse_bool) {
        settings.create = v;
    }
    if let Some(v) = read_with(&lookup, "CASHY_DB_BUSY_TIMEOUT_MS", |s| {
        parse_u32_range(s, 0, 600_000)
    }) {
        settings.busy_timeout_ms = v;
    }
    if let Some(v) = read_with(&lookup, "CASHY_MINOR_ID", |s| {
        parse_u32_range(s, 0, 0x7FFF_FFFF)
    }) {
        settings.minor_id = v;
    }
}

fn read_with<F, P, T>(lookup: &F, name: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let raw = lookup(name)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "invalid env override, ignoring");
    }
    parsed
}

/// Parse `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, case-insensitively.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u32` within `min..=max`.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
