//! Configuration utilities for wirebridge
//!
//! Settings are plain serde structs with `Default` impls. They can be layered
//! from a JSON file and overridden by environment variables using a prefix and
//! `__` as the nesting separator, e.g. `WIREBRIDGE__QUERY__BATCH_SIZE=500`.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level settings for a wirebridge process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Request defaults
    pub query: QuerySettings,
    /// Inferred schema cache
    pub schema_cache: SchemaCacheSettings,
    /// Logging configuration
    pub telemetry: TelemetrySettings,
}

/// Defaults applied to every query unless the request overrides them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Rows per flushed batch
    pub batch_size: usize,
    /// Per-request deadline in seconds (0 disables it)
    pub timeout_secs: u64,
    /// Append `DEFAULT` clauses when rendering column declarations
    pub emit_default_values: bool,
    /// Name of the virtual column carrying the data source id
    pub datasource_column_name: String,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            timeout_secs: 0,
            emit_default_values: false,
            datasource_column_name: "datasource".into(),
        }
    }
}

impl QuerySettings {
    /// Deadline as a duration, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Schema cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaCacheSettings {
    /// Enable the cache
    pub enabled: bool,
    /// Maximum number of cached schemas
    pub max_entries: usize,
    /// Time-to-live in seconds
    pub ttl_secs: u64,
}

impl Default for SchemaCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
            ttl_secs: 300,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable JSON log format
    pub json_logs: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            json_logs: false,
        }
    }
}

/// Load configuration from environment variables
pub fn load_from_env<T: for<'de> Deserialize<'de>>(prefix: &str) -> Result<T> {
    let settings = config::Config::builder()
        .add_source(config::Environment::with_prefix(prefix).separator("__"))
        .build()?
        .try_deserialize()?;
    Ok(settings)
}

/// Load configuration from a JSON file, with environment variables taking precedence
pub fn load_file<T: for<'de> Deserialize<'de>>(path: &Path, prefix: &str) -> Result<T> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Json))
        .add_source(config::Environment::with_prefix(prefix).separator("__"))
        .build()?
        .try_deserialize()?;
    Ok(settings)
}

/// Get environment variable as parsed type with default
pub fn env_parse_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.query.batch_size, 100);
        assert_eq!(settings.query.timeout(), None);
        assert_eq!(settings.query.datasource_column_name, "datasource");
        assert!(settings.schema_cache.enabled);
        assert_eq!(settings.schema_cache.max_entries, 100);
        assert_eq!(settings.telemetry.log_level, "info");
    }

    #[test]
    fn test_load_from_env_overrides_nested_field() {
        std::env::set_var("WBTESTENV__QUERY__BATCH_SIZE", "7");
        std::env::set_var("WBTESTENV__SCHEMA_CACHE__TTL_SECS", "12");
        let settings: BridgeSettings = load_from_env("WBTESTENV").unwrap();
        assert_eq!(settings.query.batch_size, 7);
        assert_eq!(settings.schema_cache.ttl_secs, 12);
        // untouched fields keep their defaults
        assert_eq!(settings.schema_cache.max_entries, 100);
        std::env::remove_var("WBTESTENV__QUERY__BATCH_SIZE");
        std::env::remove_var("WBTESTENV__SCHEMA_CACHE__TTL_SECS");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"query": {{"batch_size": 25, "timeout_secs": 3}}, "telemetry": {{"json_logs": true}}}}"#
        )
        .unwrap();

        let settings: BridgeSettings = load_file(file.path(), "WBTESTFILE").unwrap();
        assert_eq!(settings.query.batch_size, 25);
        assert_eq!(settings.query.timeout(), Some(Duration::from_secs(3)));
        assert!(settings.telemetry.json_logs);
        assert_eq!(settings.telemetry.log_level, "info");
    }

    #[test]
    fn test_load_file_missing_is_config_error() {
        let err = load_file::<BridgeSettings>(Path::new("/nonexistent/wirebridge.json"), "WBTESTMISSING")
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_env_parse_or_default() {
        assert_eq!(env_parse_or_default("WBTEST_UNSET_VALUE", 42u32), 42);
    }
}
