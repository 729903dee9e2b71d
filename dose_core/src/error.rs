//! Error types for the dose_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dose_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected by an administrative operation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A user, prescription or notification is not present
    #[error("Not found: {0}")]
    NotFound(String),

    /// The stored aggregate changed since it was loaded
    #[error("Version conflict for user {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    /// Outbound delivery error
    #[error("Channel error: {0}")]
    Channel(#[from] crate::channel::ChannelError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
