//! Error types for the application-facing layers.

use thiserror::Error;

/// Main error type for window and configuration failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event loop errors
    #[error("Window error: {0}")]
    Window(String),

    /// Malformed configuration values
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the core [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
