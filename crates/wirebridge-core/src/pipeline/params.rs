//! Request parameters
//!
//! Parsed from the flat string map the front end hands over, e.g.
//! `batch_size=500&null_as_default&position=3`. Unknown keys are ignored.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use wirebridge_common::{BridgeError, QuerySettings, Result};

use crate::param::parse_bool;

pub const PARAM_BATCH_SIZE: &str = "batch_size";
pub const PARAM_OFFSET: &str = "offset";
pub const PARAM_POSITION: &str = "position";
pub const PARAM_NULL_AS_DEFAULT: &str = "null_as_default";
pub const PARAM_DATASOURCE_COLUMN: &str = "datasource_column";
pub const PARAM_CUSTOM_COLUMNS: &str = "custom_columns";
pub const PARAM_DEBUG: &str = "debug";
pub const PARAM_MUTATION: &str = "mutation";
pub const PARAM_NO_CACHE: &str = "no_cache";
pub const PARAM_TIMEOUT: &str = "timeout";

/// Upper bound on rows per batch; larger requests are clamped
pub const MAX_BATCH_SIZE: usize = 1_000_000;

/// Per-request knobs of the streaming pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameters {
    /// Rows per flushed batch, within `1..=MAX_BATCH_SIZE`
    pub batch_size: usize,
    /// Rows to skip before streaming
    pub offset: u64,
    /// 1-based row to start from, 0 when unset. Wins over `offset`.
    pub position: u64,
    /// Write defaults instead of null markers for nullable columns
    pub null_as_default: bool,
    /// Expose the data source id as a virtual column
    pub datasource_column: bool,
    /// Expose the data source's custom columns
    pub custom_columns: bool,
    /// Return a diagnostic row instead of data
    pub debug: bool,
    /// Run as a mutation and return the affected row count
    pub mutation: bool,
    /// Skip the schema cache
    pub no_cache: bool,
    pub timeout: Option<Duration>,
    /// Name of the virtual data source column
    pub datasource_column_name: String,
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self::from_settings(&QuerySettings::default())
    }
}

impl QueryParameters {
    /// Defaults taken from process settings
    pub fn from_settings(settings: &QuerySettings) -> Self {
        Self {
            batch_size: clamp_batch_size(settings.batch_size),
            offset: 0,
            position: 0,
            null_as_default: false,
            datasource_column: false,
            custom_columns: false,
            debug: false,
            mutation: false,
            no_cache: false,
            timeout: settings.timeout(),
            datasource_column_name: settings.datasource_column_name.clone(),
        }
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut params = Self::default();
        params.merge_map(map)?;
        Ok(params)
    }

    /// Override fields from a parameter map
    pub fn merge_map(&mut self, map: &HashMap<String, String>) -> Result<()> {
        for (key, value) in map {
            match key.as_str() {
                PARAM_BATCH_SIZE => self.batch_size = clamp_batch_size(parse_number(key, value)?),
                PARAM_OFFSET => self.offset = parse_number(key, value)?,
                PARAM_POSITION => self.position = parse_number(key, value)?,
                PARAM_NULL_AS_DEFAULT => self.null_as_default = parse_flag(key, value)?,
                PARAM_DATASOURCE_COLUMN => self.datasource_column = parse_flag(key, value)?,
                PARAM_CUSTOM_COLUMNS => self.custom_columns = parse_flag(key, value)?,
                PARAM_DEBUG => self.debug = parse_flag(key, value)?,
                PARAM_MUTATION => self.mutation = parse_flag(key, value)?,
                PARAM_NO_CACHE => self.no_cache = parse_flag(key, value)?,
                PARAM_TIMEOUT => {
                    let secs: u64 = parse_number(key, value)?;
                    self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                _ => debug!(key = %key, "ignoring unknown query parameter"),
            }
        }
        Ok(())
    }
}

impl fmt::Display for QueryParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}&{}={}&{}={}&{}={}&{}={}&{}={}&{}={}&{}={}&{}={}&{}={}",
            PARAM_BATCH_SIZE,
            self.batch_size,
            PARAM_OFFSET,
            self.offset,
            PARAM_POSITION,
            self.position,
            PARAM_NULL_AS_DEFAULT,
            self.null_as_default,
            PARAM_DATASOURCE_COLUMN,
            self.datasource_column,
            PARAM_CUSTOM_COLUMNS,
            self.custom_columns,
            PARAM_DEBUG,
            self.debug,
            PARAM_MUTATION,
            self.mutation,
            PARAM_NO_CACHE,
            self.no_cache,
            PARAM_TIMEOUT,
            self.timeout.map(|t| t.as_secs()).unwrap_or(0)
        )
    }
}

fn clamp_batch_size(rows: usize) -> usize {
    rows.clamp(1, MAX_BATCH_SIZE)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        BridgeError::invalid_argument(format!("parameter '{}' expects a number, got '{}'", key, value))
    })
}

/// Bare presence (empty value) counts as true
fn parse_flag(key: &str, value: &str) -> Result<bool> {
    if value.trim().is_empty() {
        return Ok(true);
    }
    parse_bool(value.trim()).ok_or_else(|| {
        BridgeError::invalid_argument(format!("parameter '{}' expects a boolean, got '{}'", key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let params = QueryParameters::default();
        assert_eq!(params.batch_size, 100);
        assert_eq!(params.position, 0);
        assert!(!params.null_as_default);
        assert_eq!(params.timeout, None);
        assert_eq!(params.datasource_column_name, "datasource");
    }

    #[test]
    fn test_from_map() {
        let params = QueryParameters::from_map(&map(&[
            ("batch_size", "2"),
            ("position", "3"),
            ("null_as_default", ""),
            ("custom_columns", "yes"),
            ("debug", "0"),
            ("timeout", "30"),
            ("unknown", "whatever"),
        ]))
        .unwrap();
        assert_eq!(params.batch_size, 2);
        assert_eq!(params.position, 3);
        assert!(params.null_as_default);
        assert!(params.custom_columns);
        assert!(!params.debug);
        assert_eq!(params.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_batch_size_minimum() {
        let params = QueryParameters::from_map(&map(&[("batch_size", "0")])).unwrap();
        assert_eq!(params.batch_size, 1);
    }

    #[test]
    fn test_batch_size_maximum() {
        let huge = usize::MAX.to_string();
        let params = QueryParameters::from_map(&map(&[("batch_size", huge.as_str())])).unwrap();
        assert_eq!(params.batch_size, MAX_BATCH_SIZE);

        let settings = QuerySettings {
            batch_size: usize::MAX,
            ..QuerySettings::default()
        };
        assert_eq!(QueryParameters::from_settings(&settings).batch_size, MAX_BATCH_SIZE);
    }

    #[test]
    fn test_malformed_values() {
        let err = QueryParameters::from_map(&map(&[("offset", "ten")])).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert!(QueryParameters::from_map(&map(&[("mutation", "maybe")])).is_err());
    }

    #[test]
    fn test_from_settings() {
        let settings = QuerySettings {
            batch_size: 0,
            timeout_secs: 5,
            emit_default_values: false,
            datasource_column_name: "source".into(),
        };
        let params = QueryParameters::from_settings(&settings);
        assert_eq!(params.batch_size, 1);
        assert_eq!(params.timeout, Some(Duration::from_secs(5)));
        assert_eq!(params.datasource_column_name, "source");
    }

    #[test]
    fn test_display() {
        let params = QueryParameters::default();
        let text = params.to_string();
        assert!(text.starts_with("batch_size=100&offset=0&position=0"));
        assert!(text.ends_with("timeout=0"));
    }
}
