/*!
Common error types for the laser pointer components.
*/

use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, SharedError>;

/// Comprehensive error type for all shared operations
#[derive(Error, Debug)]
pub enum SharedError {
    /// Angle text that is neither sexagesimal nor a decimal with a unit mark
    #[error("Malformed angle: {0}")]
    MalformedAngle(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid telescope frame data
    #[error("Invalid frame data: {0}")]
    InvalidFrame(String),

    /// Unknown serial command or argument
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(String),
}

impl SharedError {
    /// Create a new generic error with a message
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a new malformed angle error
    pub fn malformed_angle(msg: impl Into<String>) -> Self {
        Self::MalformedAngle(msg.into())
    }

    /// Create a new invalid frame error
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create a new invalid command error
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        Self::InvalidCommand(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
