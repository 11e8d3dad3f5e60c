//! Error types for the vistagraph core
//!
//! Only configuration errors are fatal. Invalid input, slot exhaustion,
//! transient source failures and cancellation are recovered where they happen
//! and surface as statistics or explicit outcome values instead.

use thiserror::Error;

/// Main error type for the core
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source error for chunk {chunk}: {message}")]
    Source { chunk: String, message: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True for the one category allowed to stop the system
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
