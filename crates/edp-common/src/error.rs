//! Error types shared across EDP crates

use thiserror::Error;

/// Result type alias for EDP operations
pub type Result<T> = std::result::Result<T, EdpError>;

/// Cross-cutting error type for the EDP workspace
#[derive(Error, Debug)]
pub enum EdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl EdpError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
