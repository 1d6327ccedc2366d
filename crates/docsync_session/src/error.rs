//! Error types for the sync session.

use docsync_store::StoreError;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur in session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session is not configured well enough to attempt the operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The remote store could not be reached or rejected the credentials.
    #[error("connection error: {0}")]
    Connection(#[source] StoreError),

    /// A local store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Settings or status could not be loaded or saved.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The session controller is no longer running.
    #[error("session controller has shut down")]
    Closed,
}

impl SessionError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Wraps a store error raised while talking to the remote.
    pub fn connection(error: StoreError) -> Self {
        Self::Connection(error)
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl ToString) -> Self {
        Self::Persistence(message.to_string())
    }

    /// Returns true if a later connection attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Connection(_) => true,
            SessionError::Store(e) => e.is_connection_error(),
            _ => false,
        }
    }
}
