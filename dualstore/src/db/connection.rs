//! Pooled connections, transactions, and the affected-row contract.

use super::error::DatabaseError;
use super::value::Statement;
use crate::config::DatabaseConfig;
use crate::errors::Error;
use crate::ledger::{CompensationFailure, RollbackLedger};
use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::Transaction;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Outcome of an executed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows inserted, updated, or deleted.
    pub rows_affected: u64,
    /// Rowid of the last inserted row on this connection.
    pub last_insert_id: i64,
}

enum Handle {
    Pooled(PoolConnection<Sqlite>),
    Transaction(Transaction<'static, Sqlite>),
}

/// A single relational connection, either plain or inside a transaction.
///
/// Statements on one connection run strictly in program order. The
/// underlying connection goes back to the pool when this value is dropped;
/// an uncommitted transaction is rolled back at that point.
pub struct Connection {
    handle: Handle,
}

impl Connection {
    /// Whether statements run inside a transaction.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        matches!(self.handle, Handle::Transaction(_))
    }

    fn raw(&mut self) -> &mut SqliteConnection {
        match &mut self.handle {
            Handle::Pooled(conn) => &mut **conn,
            Handle::Transaction(tx) => &mut **tx,
        }
    }

    /// Runs a query and returns every row.
    pub async fn query_any(&mut self, stmt: &Statement) -> Result<Vec<SqliteRow>, DatabaseError> {
        trace!(verb = %stmt.verb(), params = stmt.params().len(), "query");
        stmt.query()
            .fetch_all(self.raw())
            .await
            .map_err(|e| DatabaseError::from_driver(&e, stmt))
    }

    /// Runs a query that must return exactly one row.
    pub async fn query_one(&mut self, stmt: &Statement) -> Result<SqliteRow, DatabaseError> {
        let mut rows = self.query_any(stmt).await?;
        check_count(stmt, rows.len() as u64, 1, 1)?;
        rows.pop()
            .ok_or_else(|| DatabaseError::no_such_entry("query returned no rows"))
    }

    /// Runs a query that may return at most one row.
    pub async fn query_binary(&mut self, stmt: &Statement) -> Result<Option<SqliteRow>, DatabaseError> {
        let mut rows = self.query_any(stmt).await?;
        check_count(stmt, rows.len() as u64, 0, 1)?;
        Ok(rows.pop())
    }

    /// Executes a statement with no affected-row constraint.
    pub async fn execute_any(&mut self, stmt: &Statement) -> Result<ExecResult, DatabaseError> {
        trace!(verb = %stmt.verb(), params = stmt.params().len(), "execute");
        let done = stmt
            .query()
            .execute(self.raw())
            .await
            .map_err(|e| DatabaseError::from_driver(&e, stmt))?;
        Ok(ExecResult {
            rows_affected: done.rows_affected(),
            last_insert_id: done.last_insert_rowid(),
        })
    }

    /// Executes a statement that must affect exactly one row.
    pub async fn execute_one(&mut self, stmt: &Statement) -> Result<ExecResult, DatabaseError> {
        let result = self.execute_any(stmt).await?;
        check_count(stmt, result.rows_affected, 1, 1)?;
        Ok(result)
    }

    /// Executes a statement that may affect at most one row.
    pub async fn execute_binary(&mut self, stmt: &Statement) -> Result<ExecResult, DatabaseError> {
        let result = self.execute_any(stmt).await?;
        check_count(stmt, result.rows_affected, 0, 1)?;
        Ok(result)
    }

    /// Commits the transaction. A no-op for plain connections.
    pub async fn commit(self) -> Result<(), DatabaseError> {
        match self.handle {
            Handle::Transaction(tx) => tx
                .commit()
                .await
                .map_err(|e| DatabaseError::fault(format!("commit failed: {e}"))),
            Handle::Pooled(_) => Ok(()),
        }
    }

    /// Rolls the transaction back. A no-op for plain connections.
    pub async fn rollback(self) -> Result<(), DatabaseError> {
        match self.handle {
            Handle::Transaction(tx) => tx
                .rollback()
                .await
                .map_err(|e| DatabaseError::fault(format!("rollback failed: {e}"))),
            Handle::Pooled(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

fn check_count(stmt: &Statement, count: u64, min: u64, max: u64) -> Result<(), DatabaseError> {
    let error = if count < min {
        DatabaseError::no_such_entry(format!(
            "{} matched {count} rows, expected at least {min}",
            stmt.verb()
        ))
    } else if count > max {
        DatabaseError::ambiguous(format!(
            "{} matched {count} rows, expected at most {max}",
            stmt.verb()
        ))
    } else {
        return Ok(());
    };

    if stmt.is_internal() {
        Err(error.into_fault())
    } else {
        Err(error)
    }
}

/// A transaction together with the compensations recorded inside it.
#[derive(Debug)]
pub struct TransactionScope {
    connection: Connection,
    ledger: RollbackLedger,
}

impl TransactionScope {
    /// The transaction's connection.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// The transaction's rollback ledger.
    pub fn ledger(&mut self) -> &mut RollbackLedger {
        &mut self.ledger
    }

    /// Both halves at once, for operations that need them together.
    pub fn parts(&mut self) -> (&mut Connection, &mut RollbackLedger) {
        (&mut self.connection, &mut self.ledger)
    }

    /// Commits and discards the ledger.
    ///
    /// A failed commit leaves the relational side rolled back, so the ledger
    /// is replayed before the error is returned.
    pub async fn commit(self) -> Result<(), DatabaseError> {
        let Self { connection, ledger } = self;
        match connection.commit().await {
            Ok(()) => {
                ledger.discard();
                Ok(())
            }
            Err(err) => {
                let failures = ledger.replay().await;
                if !failures.is_empty() {
                    error!(failed = failures.len(), error = %err, "commit failed with unapplied compensations");
                }
                Err(err)
            }
        }
    }

    /// Rolls back, then replays the ledger.
    ///
    /// Returns the compensations that could not be applied.
    pub async fn rollback(self) -> Vec<CompensationFailure> {
        if let Err(err) = self.connection.rollback().await {
            error!(error = %err, "relational rollback failed");
        }
        let pending = self.ledger.len();
        let failures = self.ledger.replay().await;
        debug!(pending, failed = failures.len(), "rollback complete");
        failures
    }
}

/// The relational pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens a pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::fault(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::fault(format!("failed to connect: {e}")))?;

        debug!(max_connections = config.max_connections, "database pool opened");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquires a plain connection.
    pub async fn open_connection(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DatabaseError::fault(format!("failed to acquire connection: {e}")))?;
        Ok(Connection {
            handle: Handle::Pooled(conn),
        })
    }

    /// Begins a transaction with a fresh ledger.
    pub async fn begin(&self) -> Result<TransactionScope, DatabaseError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::fault(format!("failed to begin transaction: {e}")))?;
        Ok(TransactionScope {
            connection: Connection {
                handle: Handle::Transaction(tx),
            },
            ledger: RollbackLedger::new(),
        })
    }

    /// Runs `f` inside a transaction.
    ///
    /// On `Ok` the transaction commits and the ledger is discarded. On `Err`
    /// the transaction rolls back, the ledger is replayed, and the original
    /// error is returned.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: for<'c> FnOnce(&'c mut Connection, &'c mut RollbackLedger) -> BoxFuture<'c, Result<T, Error>>
            + Send,
        T: Send,
    {
        let mut scope = self.begin().await?;
        let result = {
            let (conn, ledger) = scope.parts();
            f(conn, ledger).await
        };

        match result {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let failures = scope.rollback().await;
                if !failures.is_empty() {
                    warn!(
                        failed = failures.len(),
                        error = %err,
                        "transaction rolled back with unapplied compensations"
                    );
                }
                Err(err)
            }
        }
    }

    /// Closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
