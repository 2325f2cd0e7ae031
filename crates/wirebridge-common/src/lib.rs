//! Wirebridge Common Library
//!
//! Shared error type, configuration and telemetry setup for all wirebridge crates.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types
pub use config::{BridgeSettings, QuerySettings, SchemaCacheSettings, TelemetrySettings};
pub use error::{BridgeError, Result};
