//! Error types for the mango supervisor.

use config::ConfigError;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising processes.
#[derive(Error, Debug)]
pub enum Error {
    /// Process could not be spawned
    #[error("Failed to start {name}: {reason}")]
    Spawn { name: String, reason: String },

    /// Signal could not be delivered
    #[error("Failed to deliver signal: {0}")]
    SignalDelivery(String),

    /// Operation requires a started process
    #[error("Process has not been started")]
    NotStarted,

    /// Process was already started
    #[error("Process has already been started")]
    AlreadyStarted,

    /// Process was already waited on
    #[error("Process has already been waited on")]
    AlreadyWaited,

    /// Loki did not become ready
    #[error("Loki did not respond at {url} after {attempts} attempts")]
    LokiNotReady { url: String, attempts: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
