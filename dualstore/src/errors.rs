//! Error types for the dualstore engine.
//!
//! Store failures are classified where they happen ([`DatabaseError`],
//! [`BlobError`]); business-rule failures carry their own status
//! ([`ServerError`]); misuse of the pipeline is a [`PipelineFault`]. The
//! top-level [`Error`] is translated into a caller-facing status and message
//! in exactly one place, [`Error::status`] and [`Error::public_message`].

use crate::blob::BlobError;
use crate::config::ConfigError;
use crate::db::DatabaseError;
use thiserror::Error;

/// Message for every 5xx response; detail only goes to the logs.
pub const GENERIC_FAULT_MESSAGE: &str = "An unexpected server fault has occurred";

/// The main error type for dualstore operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A classified relational failure.
    #[error("{0}")]
    Database(#[from] DatabaseError),

    /// A blob store failure.
    #[error("{0}")]
    Blob(#[from] BlobError),

    /// A business-rule failure with an explicit status.
    #[error("{0}")]
    Server(#[from] ServerError),

    /// The pipeline was driven incorrectly.
    #[error("{0}")]
    Pipeline(#[from] PipelineFault),

    /// Invalid configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An external collaborator (compiler, notifier) failed.
    #[error("Collaborator failure: {0}")]
    Collaborator(#[from] anyhow::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Status code the caller sees.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Database(e) => e.kind.http_status(),
            Self::Blob(BlobError::NotFound { .. }) => 404,
            Self::Blob(BlobError::NoContent { .. } | BlobError::InvalidKey { .. }) => 400,
            Self::Server(e) => e.status,
            Self::Blob(_)
            | Self::Pipeline(_)
            | Self::Config(_)
            | Self::Collaborator(_)
            | Self::Serialization(_) => 500,
        }
    }

    /// Message the caller sees.
    ///
    /// Every 5xx collapses to [`GENERIC_FAULT_MESSAGE`].
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.status() >= 500 {
            return GENERIC_FAULT_MESSAGE.to_string();
        }
        match self {
            Self::Database(e) => e.kind.http_message().to_string(),
            Self::Blob(BlobError::NotFound { .. }) => {
                "Requested resource could not be located".to_string()
            }
            Self::Blob(BlobError::NoContent { .. }) => {
                "Requested resource has no stored content".to_string()
            }
            Self::Blob(BlobError::InvalidKey { .. }) => "Request names an invalid object".to_string(),
            Self::Server(e) => e.external.clone(),
            _ => GENERIC_FAULT_MESSAGE.to_string(),
        }
    }

    /// Returns true for 4xx statuses.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// The relational error, if this is one.
    #[must_use]
    pub const fn as_database(&self) -> Option<&DatabaseError> {
        match self {
            Self::Database(e) => Some(e),
            _ => None,
        }
    }
}

/// A business-rule failure with an explicit status and caller-facing message.
#[derive(Debug, Clone, Error)]
#[error("{status} {external}{}", .internal.as_ref().map(|i| format!(" ({i})")).unwrap_or_default())]
pub struct ServerError {
    /// Status code.
    pub status: u16,
    /// Message shown to the caller.
    pub external: String,
    /// Detail kept for the logs.
    pub internal: Option<String>,
}

impl ServerError {
    /// Creates a new server error.
    #[must_use]
    pub fn new(status: u16, external: impl Into<String>) -> Self {
        Self {
            status,
            external: external.into(),
            internal: None,
        }
    }

    /// Attaches internal detail.
    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal = Some(internal.into());
        self
    }

    /// 400 with the given message.
    #[must_use]
    pub fn bad_request(external: impl Into<String>) -> Self {
        Self::new(400, external)
    }

    /// 401: no authenticated identity.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::new(401, "You must be logged in to perform this action")
    }

    /// 403: the identity may not touch the resource.
    #[must_use]
    pub fn access_denied() -> Self {
        Self::new(403, "Access denied to requested resource")
    }

    /// 404 with the given message.
    #[must_use]
    pub fn not_found(external: impl Into<String>) -> Self {
        Self::new(404, external)
    }

    /// 400: a required input is missing.
    #[must_use]
    pub fn missing_field(location: &str, field: &str) -> Self {
        Self::bad_request(format!("Missing field in {location}: '{field}'"))
    }

    /// 400: an input failed validation.
    #[must_use]
    pub fn bad_value(field: &str) -> Self {
        Self::bad_request(format!("Bad value given for field '{field}'"))
    }
}

/// The pipeline executor was driven incorrectly. Always a server defect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineFault {
    /// A second termination was attempted.
    #[error("pipeline '{pipeline}' terminated more than once")]
    AlreadyTerminated {
        /// Pipeline name.
        pipeline: String,
    },

    /// A step tried to proceed after the pipeline terminated.
    #[error("pipeline '{pipeline}' proceeded after termination")]
    ProceedAfterTermination {
        /// Pipeline name.
        pipeline: String,
    },

    /// The step list ran out without a termination.
    #[error("pipeline '{pipeline}' was never terminated")]
    NeverTerminated {
        /// Pipeline name.
        pipeline: String,
    },

    /// A step read a resource nothing populated.
    #[error("resource '{name}' was never populated")]
    MissingResource {
        /// Resource name.
        name: String,
    },

    /// A step tried to overwrite a populated resource.
    #[error("resource '{name}' is already populated")]
    ResourceConflict {
        /// Resource name.
        name: String,
    },

    /// A resource held a different kind than requested.
    #[error("resource '{name}' is not {expected}")]
    WrongResourceKind {
        /// Resource name.
        name: String,
        /// What the step asked for.
        expected: String,
    },

    /// The step list cannot be executed as declared.
    #[error("pipeline '{pipeline}' is malformed: {reason}")]
    Malformed {
        /// Pipeline name.
        pipeline: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A step needed an open transaction.
    #[error("step '{step}' requires an open transaction")]
    NoTransaction {
        /// Step name.
        step: String,
    },
}

impl PipelineFault {
    /// A missing-resource fault.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingResource { name: name.into() }
    }

    /// A wrong-kind fault.
    #[must_use]
    pub fn wrong_kind(name: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::WrongResourceKind {
            name: name.into(),
            expected: expected.into(),
        }
    }
}
