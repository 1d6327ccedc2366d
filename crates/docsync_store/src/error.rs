//! Error types for document stores.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The transform hook rejected the document.
    #[error("transform error: {0}")]
    Transform(#[from] docsync_document::TransformError),

    /// The store cannot be reached.
    #[error("store `{name}` is unreachable")]
    Unreachable {
        /// Store name or address.
        name: String,
    },

    /// Credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The store was destroyed.
    #[error("store `{name}` has been destroyed")]
    Destroyed {
        /// Store name.
        name: String,
    },

    /// Write conflicts with the stored revision.
    #[error("document update conflict for `{id}`")]
    Conflict {
        /// Document id.
        id: String,
    },

    /// The document is missing a required field or is otherwise unusable.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// No store is known under this address.
    #[error("no store at `{0}`")]
    NotFound(String),
}

impl StoreError {
    /// Creates an unreachable error.
    pub fn unreachable(name: impl Into<String>) -> Self {
        Self::Unreachable { name: name.into() }
    }

    /// Creates a destroyed error.
    pub fn destroyed(name: impl Into<String>) -> Self {
        Self::Destroyed { name: name.into() }
    }

    /// Creates a conflict error.
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// True for errors caused by the connection rather than the request.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            StoreError::Unreachable { .. } | StoreError::Unauthorized(_) | StoreError::NotFound(_)
        )
    }
}
