//! Error types for the document crate.

use thiserror::Error;

/// Result type for document transform operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Errors that can occur while transforming a document.
///
/// Every variant is fatal to the read or write that triggered the transform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// A transform was required but no password is configured.
    #[error("no password configured for document encryption")]
    MissingPassword,

    /// The cipher failed to encrypt a field.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// The cipher failed to decrypt a field (wrong password, corrupted data).
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// A field in an encrypted document does not hold a ciphertext string.
    #[error("field `{field}` is not valid ciphertext")]
    MalformedCiphertext {
        /// Key of the offending field.
        field: String,
    },

    /// The input cannot be represented as a document.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },
}

impl TransformError {
    /// Create an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Create a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Create a malformed ciphertext error.
    pub fn malformed(field: impl Into<String>) -> Self {
        Self::MalformedCiphertext {
            field: field.into(),
        }
    }

    /// Create an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }
}
