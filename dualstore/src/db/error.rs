//! Relational error taxonomy.
//!
//! Every failure that crosses the connection boundary is classified into one
//! of a closed set of kinds. Each kind carries the status and message a
//! caller sees; the driver's own message stays in [`DatabaseError::message`]
//! for the logs.

use super::value::{Statement, Verb};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// SQLite primary result code for a datatype mismatch.
const SQLITE_MISMATCH: &str = "20";

/// Classification of a relational failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbErrorKind {
    /// Unexpected failure; indicates a server-side defect.
    QueryFault,
    /// The addressed row does not exist.
    NoSuchEntry,
    /// A unique constraint was violated.
    EntryConflict,
    /// A value had the wrong type or was missing.
    BadDatatype,
    /// A precondition or check constraint failed.
    ConstraintViolated,
    /// A referenced row does not exist.
    NoForeignKey,
    /// The row is still referenced by a dependent row.
    ReferencedKey,
    /// More rows matched than the operation allows.
    QueryAmbiguous,
}

impl DbErrorKind {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::QueryFault => "QUERY_FAULT",
            Self::NoSuchEntry => "NO_SUCH_ENTRY",
            Self::EntryConflict => "ENTRY_CONFLICT",
            Self::BadDatatype => "BAD_DATATYPE",
            Self::ConstraintViolated => "CONSTRAINT_VIOLATED",
            Self::NoForeignKey => "NO_FOREIGN_KEY",
            Self::ReferencedKey => "REFERENCED_KEY",
            Self::QueryAmbiguous => "QUERY_AMBIGUOUS",
        }
    }

    /// HTTP-style status for this kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::QueryFault | Self::QueryAmbiguous => 500,
            Self::NoSuchEntry => 404,
            Self::EntryConflict | Self::ReferencedKey => 409,
            Self::BadDatatype | Self::ConstraintViolated | Self::NoForeignKey => 400,
        }
    }

    /// Caller-facing message for this kind.
    #[must_use]
    pub const fn http_message(self) -> &'static str {
        match self {
            Self::QueryFault => "An unexpected server fault has occurred",
            Self::NoSuchEntry => "Requested resource could not be located",
            Self::EntryConflict => "Requested resource already exists",
            Self::BadDatatype => "Request contains a datatype mismatch",
            Self::ConstraintViolated => "Request violates data preconditions",
            Self::NoForeignKey => "Request references a resource which does not exist",
            Self::ReferencedKey => {
                "Requested resource could not be altered due to a dependency"
            }
            Self::QueryAmbiguous => "Server state corrupted",
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A classified relational failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct DatabaseError {
    /// Classification.
    pub kind: DbErrorKind,
    /// Internal detail, never shown to callers.
    pub message: String,
    /// Driver result code, when the failure came from the driver.
    pub sql_code: Option<String>,
}

impl DatabaseError {
    /// Creates a new error of the given kind.
    #[must_use]
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sql_code: None,
        }
    }

    /// Sets the driver result code.
    #[must_use]
    pub fn with_sql_code(mut self, code: impl Into<String>) -> Self {
        self.sql_code = Some(code.into());
        self
    }

    /// A [`DbErrorKind::NoSuchEntry`] error.
    #[must_use]
    pub fn no_such_entry(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::NoSuchEntry, message)
    }

    /// A [`DbErrorKind::QueryAmbiguous`] error.
    #[must_use]
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::QueryAmbiguous, message)
    }

    /// A [`DbErrorKind::ConstraintViolated`] error.
    #[must_use]
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::ConstraintViolated, message)
    }

    /// A [`DbErrorKind::BadDatatype`] error.
    #[must_use]
    pub fn bad_datatype(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::BadDatatype, message)
    }

    /// A [`DbErrorKind::QueryFault`] error.
    #[must_use]
    pub fn fault(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::QueryFault, message)
    }

    /// Returns true if the error is of the given kind.
    #[must_use]
    pub fn is(&self, kind: DbErrorKind) -> bool {
        self.kind == kind
    }

    /// Reclassifies the error as a query fault, keeping the detail.
    #[must_use]
    pub fn into_fault(self) -> Self {
        Self {
            kind: DbErrorKind::QueryFault,
            message: format!("{}: {}", self.kind, self.message),
            sql_code: self.sql_code,
        }
    }

    /// Classifies a driver error raised while running `stmt`.
    pub(crate) fn from_driver(err: &sqlx::Error, stmt: &Statement) -> Self {
        let classified = classify(err, stmt.verb());
        if stmt.is_internal() {
            classified.into_fault()
        } else {
            classified
        }
    }
}

fn classify(err: &sqlx::Error, verb: Verb) -> DatabaseError {
    use sqlx::error::ErrorKind;

    match err {
        sqlx::Error::RowNotFound => DatabaseError::no_such_entry(err.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned());
            let kind = match db.kind() {
                ErrorKind::UniqueViolation => DbErrorKind::EntryConflict,
                ErrorKind::ForeignKeyViolation if verb == Verb::Delete => {
                    DbErrorKind::ReferencedKey
                }
                ErrorKind::ForeignKeyViolation => DbErrorKind::NoForeignKey,
                ErrorKind::NotNullViolation => DbErrorKind::BadDatatype,
                ErrorKind::CheckViolation => DbErrorKind::ConstraintViolated,
                _ if code.as_deref() == Some(SQLITE_MISMATCH) => DbErrorKind::BadDatatype,
                _ => DbErrorKind::QueryFault,
            };
            let error = DatabaseError::new(kind, db.message());
            match code {
                Some(code) => error.with_sql_code(code),
                None => error,
            }
        }
        _ => DatabaseError::fault(err.to_string()),
    }
}
