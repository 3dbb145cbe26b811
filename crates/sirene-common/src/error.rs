//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, SireneError>;

/// Errors raised while loading configuration or the process environment
#[derive(Error, Debug)]
pub enum SireneError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidVar {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SireneError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
