//! Relational store access.
//!
//! [`Database`] owns the pool. [`Connection`] runs [`Statement`]s and
//! enforces the affected-row contract of each operation, translating driver
//! failures into the [`DbErrorKind`] taxonomy. [`TransactionScope`] pairs a
//! transaction with the [`RollbackLedger`](crate::ledger::RollbackLedger)
//! that compensates blob writes made inside it.

mod connection;
mod error;
pub mod schema;
mod value;

pub use connection::{Connection, Database, ExecResult, TransactionScope};
pub use error::{DatabaseError, DbErrorKind};
pub use value::{Statement, Value, Verb};

#[cfg(test)]
mod db_tests;
