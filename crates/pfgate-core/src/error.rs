//! Error types for the pfgate system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for pfgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the pfgate system
#[derive(Error, Debug)]
pub enum Error {
    /// Local configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Management service errors (non-success status, bad payload)
    #[error("Remote service error: {0}")]
    Remote(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The remote fetch did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Artifact write errors
    #[error("Artifact store error: {0}")]
    Store(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine stopped accepting compiles
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a remote service error
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an artifact store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether this error came from talking to the management service.
    ///
    /// Remote errors abandon a single compile; they never stop the daemon.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Remote(_) | Self::Http(_) | Self::Authentication(_) | Self::Timeout(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
