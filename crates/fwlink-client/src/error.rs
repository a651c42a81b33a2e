//! Error types for firmware update operations

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for firmware update operations
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Errors raised by the client itself.
///
/// A transaction that runs and fails (rejected image, dropped connection,
/// timeout, cancel) is not an error: it ends with an [`Outcome`](crate::Outcome)
/// in its [`TransactionReport`](crate::TransactionReport).
#[derive(Error, Debug)]
pub enum UpdateError {
    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A transaction is already validating, uploading or reconnecting
    #[error("transaction in progress ({state})")]
    TransactionInProgress { state: crate::TransactionState },

    /// The transaction task ended without producing a report
    #[error("Transaction task failed: {0}")]
    TaskFailed(String),
}

impl UpdateError {
    /// Whether this error is the single-flight rejection
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::TransactionInProgress { .. })
    }
}
