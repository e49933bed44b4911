//! Error types for the Flowgate admission-control core.

use thiserror::Error;

/// Main error type for Flowgate operations.
///
/// A rate-limited request is not an error: it is reported through
/// [`Decision`](crate::ratelimit::Decision).
#[derive(Error, Debug)]
pub enum FlowgateError {
    /// A rule set was rejected at load time (duplicate resource, bad threshold or window).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Malformed input passed to an admission check.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Service settings could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Process-wide state was initialized twice
    #[error("Flow control is already initialized")]
    AlreadyInitialized,

    /// Process-wide state was used before `initialize`
    #[error("Flow control is not initialized")]
    NotInitialized,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Flowgate operations.
pub type Result<T> = std::result::Result<T, FlowgateError>;
