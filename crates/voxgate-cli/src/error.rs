//! CLI-specific error types and exit codes.

use thiserror::Error;
use voxgate_core::{ConfigError, TurnError};

#[derive(Debug, Error)]
pub enum CliError {
    /// Malformed or empty scenario file.
    #[error("Invalid scenario: {0}")]
    Scenario(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    /// The coordinator stopped while a scenario was running.
    #[error("Coordinator error: {0}")]
    Coordinator(String),

    /// One or more `expect` steps did not hold.
    #[error("{0}")]
    Expectation(String),
}

impl CliError {
    /// Map error to a sysexits-style exit code.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Scenario(_) => 65,    // EX_DATAERR
            Self::Config(_) => 78,      // EX_CONFIG
            Self::Io(_) => 74,          // EX_IOERR
            Self::Coordinator(_) => 70, // EX_SOFTWARE
            Self::Expectation(_) => 1,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io { .. } => Self::Io(err.to_string()),
            ConfigError::Parse(_) | ConfigError::Invalid { .. } => Self::Config(err.to_string()),
        }
    }
}

impl From<TurnError> for CliError {
    fn from(err: TurnError) -> Self {
        Self::Coordinator(err.to_string())
    }
}
