//! Error types for configuration operations

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Procfile line {line}: {reason}")]
    Procfile { line: usize, reason: String },

    #[error("Env file {path}, line {line}: {reason}")]
    EnvFile {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Invalid concurrency: {0} (concurrency should be in the format: foo=1,bar=2)")]
    Concurrency(String),

    #[error("Invalid port: {0}")]
    Port(String),
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
