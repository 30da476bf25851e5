//! Settings for docmap.
//!
//! This module provides the [`Settings`] struct, which holds mapper configuration.
//! Settings are passed explicitly: [`settings_loader`](crate::settings_loader)
//! builds them, and the mapper's `Database::from_settings` consumes them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Connection configuration handed through to a storage driver.
///
/// The mapper does not open connections itself; drivers read whichever of
/// these values they need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// The server host.
    pub host: String,
    /// The server port.
    pub port: u16,
    /// The database name.
    pub database: String,
    /// Additional driver-specific options.
    pub options: HashMap<String, String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 27017,
            database: "docmap".to_string(),
            options: HashMap::new(),
        }
    }
}

/// The complete set of mapper settings.
///
/// # Examples
///
/// ```
/// use docmap_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert_eq!(settings.dereference_max_depth, 1);
/// assert!(settings.operation_timeout_ms.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled (pretty logs instead of JSON).
    pub debug: bool,

    // ── Connections ──────────────────────────────────────────────────

    /// Connection configurations, keyed by alias (e.g. "default").
    pub connections: HashMap<String, ConnectionSettings>,
    /// The alias used when none is given.
    pub default_connection: String,

    // ── Queries ──────────────────────────────────────────────────────

    /// Per-operation deadline for driver calls, in milliseconds. `None` disables it.
    pub operation_timeout_ms: Option<u64>,
    /// Number of documents a cursor is asked to return per batch.
    pub batch_size: u32,

    // ── Dereferencing ────────────────────────────────────────────────

    /// Default number of fetch rounds used by `select_related()`.
    pub dereference_max_depth: usize,
    /// Whether querysets dereference their results unless told otherwise.
    pub auto_dereference: bool,

    // ── Logging ──────────────────────────────────────────────────────

    /// The log level (e.g. "info", "debug", "docmap_odm=trace").
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        let mut connections = HashMap::new();
        connections.insert("default".to_string(), ConnectionSettings::default());

        Self {
            debug: true,
            connections,
            default_connection: "default".to_string(),
            operation_timeout_ms: None,
            batch_size: 100,
            dereference_max_depth: 1,
            auto_dereference: false,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Returns the settings of the default connection, if configured.
    pub fn default_connection_settings(&self) -> Option<&ConnectionSettings> {
        self.connections.get(&self.default_connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert!(s.debug);
        assert_eq!(s.default_connection, "default");
        assert_eq!(s.batch_size, 100);
        assert_eq!(s.dereference_max_depth, 1);
        assert!(!s.auto_dereference);
        assert_eq!(s.log_level, "info");
    }

    #[test]
    fn test_default_connection() {
        let s = Settings::default();
        let conn = s.default_connection_settings().expect("default connection should exist");
        assert_eq!(conn.host, "localhost");
        assert_eq!(conn.port, 27017);
    }
}
