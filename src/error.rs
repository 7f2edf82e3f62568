//! Error types for the Floodgate crate.

use thiserror::Error;

/// Errors raised while loading or validating limiter configuration.
///
/// These are fatal at composition time: a process must refuse to start with
/// an invalid preset table rather than misbehave per request.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A preset failed validation.
    #[error("invalid preset `{preset}`: {reason}")]
    InvalidPreset { preset: String, reason: String },

    /// Configuration could not be parsed.
    #[error("failed to parse preset configuration: {0}")]
    Parse(String),

    /// I/O errors while reading configuration files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;
