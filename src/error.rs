//! Centralized error types for sendersweep.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the sendersweep library.
#[derive(Error, Debug)]
pub enum SweepError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mail service could not be reached or refused the request.
    ///
    /// `retryable` is set for rate limits and transport hiccups; permanent
    /// failures (revoked credentials, forbidden) leave it unset.
    #[error("Mail source unavailable: {reason}")]
    SourceUnavailable { reason: String, retryable: bool },

    /// The message id no longer exists in the mailbox.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The archive record for a message could not be written.
    #[error("Could not archive message '{id}': {reason}")]
    ArchiveWrite { id: String, reason: String },

    /// An archive record already exists for this id with different content.
    #[error("Archive record for '{id}' differs from the message (stored {found}, new {expected})")]
    IntegrityAnomaly {
        id: String,
        expected: String,
        found: String,
    },

    /// The message data from the source could not be interpreted.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A pipeline operation was called in the wrong stage.
    #[error("Pipeline is in stage '{found}', expected '{expected}'")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    /// A decision string or decision file could not be understood.
    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    /// The run was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration is incomplete or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, SweepError>`.
pub type Result<T> = std::result::Result<T, SweepError>;

impl SweepError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A transient source failure (rate limit, timeout, 5xx).
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// A permanent source failure (auth revoked, forbidden).
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            reason: reason.into(),
            retryable: false,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable {
                retryable: true,
                ..
            }
        )
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `SweepError`
/// when no path context is available (rare; prefer `SweepError::io`).
impl From<std::io::Error> for SweepError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
