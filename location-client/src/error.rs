//! Error types for hub construction and configuration.
//!
//! Client calls never return these: misuse is signaled by a `false` return
//! and processing failures by a [`LocationResponse`](crate::types::LocationResponse)
//! delivered to a callback. Errors here are environment problems.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a hub or a client.
#[derive(Debug, Error)]
pub enum LocationError {
    /// The hub must be started from inside a tokio runtime.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The hub has been shut down.
    #[error("Location hub is shut down")]
    HubShutDown,

    /// A client's dispatcher thread could not be started.
    #[error("Failed to spawn dispatcher thread: {0}")]
    DispatcherSpawn(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or parsed.
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// The configuration text is not valid INI.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A key holds a value of the wrong shape.
    #[error("Invalid value for {section}.{key}: '{value}' ({reason})")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            section: "client".to_string(),
            key: "max_buffered_reports".to_string(),
            value: "lots".to_string(),
            reason: "expected an unsigned integer".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("client.max_buffered_reports"));
        assert!(text.contains("'lots'"));
    }

    #[test]
    fn test_location_error_from_config_error() {
        let err: LocationError = ConfigError::Parse("bad line".to_string()).into();
        assert!(matches!(err, LocationError::Config(_)));
        assert!(err.to_string().contains("bad line"));
    }
}
