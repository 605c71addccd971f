//! Error types for `cmdrelay` core library.

use thiserror::Error;

/// Result type alias using `cmdrelay` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `cmdrelay` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Replacement rule error
    #[error("Invalid replacement rule: {0}")]
    Replacement(String),
}
