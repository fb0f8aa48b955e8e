//! Configuration error types.

use thiserror::Error;

/// Errors raised while locating, reading, or validating the gateway config.
///
/// Every variant is fatal at startup; during hot reload the previous config
/// stays active.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file could be located.
    #[error("config file not found: {path}")]
    NotFound { path: String },

    /// The file exists but could not be read.
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// The file is not valid JSON/YAML or does not match the config shape.
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// The config parsed but violates a structural rule.
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}
