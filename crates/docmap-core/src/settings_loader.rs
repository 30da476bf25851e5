//! Settings loading from configuration files.
//!
//! This module provides functions to load [`Settings`] from TOML and JSON, and to
//! apply environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `DOCMAP_DEBUG` | `debug` |
//! | `DOCMAP_LOG_LEVEL` | `log_level` |
//! | `DOCMAP_DEFAULT_CONNECTION` | `default_connection` |
//! | `DOCMAP_OPERATION_TIMEOUT_MS` | `operation_timeout_ms` |
//! | `DOCMAP_BATCH_SIZE` | `batch_size` |
//! | `DOCMAP_DEREFERENCE_MAX_DEPTH` | `dereference_max_depth` |
//! | `DOCMAP_AUTO_DEREFERENCE` | `auto_dereference` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use docmap_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/docmap.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::DocmapError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Any settings not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, DocmapError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| DocmapError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, DocmapError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        DocmapError::ConfigurationError(format!(
            "Failed to read TOML file '{}': {e}",
            path.as_ref().display()
        ))
    })?;
    from_toml_str(&content)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, DocmapError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, DocmapError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| DocmapError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;

    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `DOCMAP_*` environment variable overrides to a settings struct.
///
/// Values that fail to parse leave the setting unchanged.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("DOCMAP_DEBUG") {
        settings.debug = parse_flag(&val);
    }

    if let Some(val) = lookup("DOCMAP_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Some(val) = lookup("DOCMAP_DEFAULT_CONNECTION") {
        settings.default_connection = val;
    }

    if let Some(val) = lookup("DOCMAP_OPERATION_TIMEOUT_MS") {
        if val.is_empty() || val == "0" {
            settings.operation_timeout_ms = None;
        } else if let Ok(ms) = val.parse::<u64>() {
            settings.operation_timeout_ms = Some(ms);
        }
    }

    if let Some(val) = lookup("DOCMAP_BATCH_SIZE") {
        if let Ok(size) = val.parse::<u32>() {
            settings.batch_size = size;
        }
    }

    if let Some(val) = lookup("DOCMAP_DEREFERENCE_MAX_DEPTH") {
        if let Ok(depth) = val.parse::<usize>() {
            settings.dereference_max_depth = depth;
        }
    }

    if let Some(val) = lookup("DOCMAP_AUTO_DEREFERENCE") {
        settings.auto_dereference = parse_flag(&val);
    }
}

fn parse_flag(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

// ============================================================
// Helpers
// ============================================================

fn merge_over_defaults(value: serde_json::Value, format: &str) -> Result<Settings, DocmapError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        DocmapError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        DocmapError::ConfigurationError(format!("Failed to deserialize settings from {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}
