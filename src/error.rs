//! Error types for cuesync
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for cuesync
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ambient audio capture errors (device acquisition, stream failures)
    #[error("Capture error: {0}")]
    Capture(String),

    /// Matching engine errors (session creation, backend failures)
    #[error("Matcher error: {0}")]
    Matcher(String),

    /// Playback device errors (position query, seek, transport)
    #[error("Player error: {0}")]
    Player(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid timing parameters (missing session start, negative spans)
    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using cuesync Error
pub type Result<T> = std::result::Result<T, Error>;
