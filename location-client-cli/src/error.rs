//! CLI error type.

use std::fmt;

use location_client::{ConfigError, LocationError};

/// Errors surfaced to the user by `locctl`.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    Config(String),
    /// The hub or a client could not be created.
    Hub(String),
    /// The tokio runtime could not be built.
    Runtime(String),
    /// A command argument is out of range.
    InvalidArgument(String),
    /// The service refused a request.
    Rejected(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Hub(msg) => write!(f, "Location hub error: {}", msg),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Rejected(msg) => write!(f, "Request rejected: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LocationError> for CliError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::Config(e) => CliError::Config(e.to_string()),
            other => CliError::Hub(other.to_string()),
        }
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument(_) => 2,
            CliError::Config(_) => 3,
            _ => 1,
        }
    }
}
