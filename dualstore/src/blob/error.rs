//! Blob store errors.

use thiserror::Error;

/// A failed blob store operation.
#[derive(Debug, Error)]
pub enum BlobError {
    /// No object exists under the key.
    #[error("no object stored under key '{key}'")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The key cannot be stored.
    #[error("invalid blob key '{key}': {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The record has no stored content by definition.
    #[error("content unavailable: {reason}")]
    NoContent {
        /// Why the record has no content.
        reason: String,
    },

    /// Filesystem or stream failure.
    #[error("blob io error on '{key}': {source}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The store could not be reached.
    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    /// A presigned URL failed verification.
    #[error("invalid presigned url: {0}")]
    InvalidSignature(String),
}

impl BlobError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a no-content error.
    #[must_use]
    pub fn no_content(reason: impl Into<String>) -> Self {
        Self::NoContent {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }
}
