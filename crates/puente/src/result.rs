//! Result and error types for Puente.

use thiserror::Error;

/// Result type for Puente operations
pub type PuenteResult<T> = Result<T, PuenteError>;

/// Errors that can occur in Puente
#[derive(Debug, Error)]
pub enum PuenteError {
    /// Bridge was not enabled for this session
    #[error("Command bridge is disabled. Enable it in the session configuration")]
    Disabled,

    /// Host peer never connected within the allotted window
    #[error("Host connection not established within {ms}ms")]
    ConnectionTimeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// An individual command's response did not arrive in time
    #[error("Remote command timed out after {ms}ms")]
    CommandTimeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// The executor reported a failure while running the command.
    ///
    /// The message crosses the process boundary untouched, so the caller
    /// sees exactly what the host-side operation reported.
    #[error("{message}")]
    Execution {
        /// Failure message, verbatim from the executor
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
