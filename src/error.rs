//! # Error Types
//!
//! Custom error types for the DSU server using `thiserror`.

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for the DSU server
#[derive(Debug, Error)]
pub enum DsuError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// UDP socket could not be bound at startup
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Slot assignment names a script that is not in the catalog
    #[error("Unknown controller script: {0}")]
    UnknownScript(String),

    /// Slot assignment or slot option could not be parsed
    #[error("Invalid slot assignment: {0}")]
    InvalidAssignment(String),

    /// Controller script failed while running
    #[error("Controller script error: {0}")]
    Script(String),

    /// Capture file record could not be parsed
    #[error("Capture record error: {0}")]
    Capture(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the DSU server
pub type Result<T> = std::result::Result<T, DsuError>;
