//! Error types for wirebridge

use std::fmt;

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for wirebridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Value outside the representable range of its wire type
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Malformed or truncated wire data
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Malformed textual or structured schema declaration
    #[error("Schema parse error: {message} [{fragment}]")]
    SchemaParse { message: String, fragment: String },

    /// Requested column has no matching origin
    #[error("Column '{column}' not found, available result columns: [{}]", .available.join(", "))]
    Resolution {
        column: String,
        available: Vec<String>,
    },

    /// Failure raised by a row source while advancing or reading
    #[error("Failed to read from data source '{datasource}': {source:#}")]
    RowSource {
        datasource: String,
        source: anyhow::Error,
    },

    /// Sink closed or deadline exceeded
    #[error("Stream aborted: {0}")]
    Aborted(String),

    /// Invalid request parameter or value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Create an internal error from any error type
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        BridgeError::Internal(err.to_string())
    }

    pub fn encode(message: impl Into<String>) -> Self {
        BridgeError::Encode(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        BridgeError::Decode(message.into())
    }

    /// Schema error carrying the offending line or fragment
    pub fn schema(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        BridgeError::SchemaParse {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    /// Wrap a row source failure with the data source it came from
    pub fn row_source(datasource: impl Into<String>, source: anyhow::Error) -> Self {
        BridgeError::RowSource {
            datasource: datasource.into(),
            source,
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        BridgeError::Aborted(reason.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(message.into())
    }

    /// Get the error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Encode(_) => "ENCODE_ERROR",
            BridgeError::Decode(_) => "DECODE_ERROR",
            BridgeError::SchemaParse { .. } => "SCHEMA_PARSE_ERROR",
            BridgeError::Resolution { .. } => "RESOLUTION_ERROR",
            BridgeError::RowSource { .. } => "DATA_ACCESS_ERROR",
            BridgeError::Aborted(_) => "ABORTED",
            BridgeError::InvalidArgument(_) => "INVALID_ARGUMENT",
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Serialization(_) => "SERIALIZATION_ERROR",
            BridgeError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this error is part of normal operation (client went away)
    /// and should not be logged as a failure
    pub fn is_expected(&self) -> bool {
        matches!(self, BridgeError::Aborted(_))
    }
}

// Implement conversions from common error types
impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Internal(format!("IO error: {}", err))
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BridgeError::encode("x").code(), "ENCODE_ERROR");
        assert_eq!(BridgeError::aborted("closed").code(), "ABORTED");
        assert_eq!(
            BridgeError::row_source("pg", anyhow::anyhow!("boom")).code(),
            "DATA_ACCESS_ERROR"
        );
    }

    #[test]
    fn test_only_abort_is_expected() {
        assert!(BridgeError::aborted("client disconnected").is_expected());
        assert!(!BridgeError::decode("truncated").is_expected());
        assert!(!BridgeError::internal("oops").is_expected());
    }

    #[test]
    fn test_resolution_lists_available_columns() {
        let err = BridgeError::Resolution {
            column: "missing".into(),
            available: vec!["id".into(), "name".into()],
        };
        assert_eq!(
            err.to_string(),
            "Column 'missing' not found, available result columns: [id, name]"
        );
    }

    #[test]
    fn test_row_source_error_names_datasource() {
        let err = BridgeError::row_source(
            "mysql-prod",
            anyhow::anyhow!("connection reset").context("fetching row 12"),
        );
        let msg = err.to_string();
        assert!(msg.contains("mysql-prod"));
        assert!(msg.contains("fetching row 12"));
        assert!(msg.contains("connection reset"));
    }
}
