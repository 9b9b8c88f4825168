//! Typed records bound to relational tables.
//!
//! An [`Entity`] declares its table through a [`Descriptor`] and exposes its
//! columns as [`Value`]s. [`Persist`] supplies create/save/delete for every
//! entity, [`Probe`] supplies partial-match reads, and [`forward`] cascades a
//! delete to dependent entities. Records that own a blob additionally
//! implement [`BlobBacked`] and gain the compensated operations of
//! [`Content`].

mod cascade;
mod content;
mod probe;

pub use cascade::forward;
pub use content::{BlobBacked, Content};
pub use probe::Probe;

use crate::blob::BlobClient;
use crate::db::{Connection, DatabaseError, Statement, Value};
use crate::errors::Error;
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::Row;
use std::fmt::Debug;
use tracing::debug;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

impl Direction {
    const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A column and direction to order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    /// Column name.
    pub column: &'static str,
    /// Direction.
    pub direction: Direction,
}

impl OrderBy {
    pub(crate) fn sql(self) -> String {
        format!("{} {}", self.column, self.direction.sql())
    }
}

/// Static description of a record type's table.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    /// Table name.
    pub table: &'static str,
    /// Key columns; together they identify one row.
    pub keys: &'static [&'static str],
    /// Mutable value columns.
    pub attributes: &'static [&'static str],
    /// Whether the single key is generated by the store.
    pub auto_increment: bool,
    /// Value column stamped with the current time on create and save.
    pub last_modified: Option<&'static str>,
    /// Default ordering for unconstrained reads.
    pub order_by: Option<OrderBy>,
}

impl Descriptor {
    /// Describes a table with the given key and value columns.
    #[must_use]
    pub const fn new(
        table: &'static str,
        keys: &'static [&'static str],
        attributes: &'static [&'static str],
    ) -> Self {
        Self {
            table,
            keys,
            attributes,
            auto_increment: false,
            last_modified: None,
            order_by: None,
        }
    }

    /// Marks the key as store-generated.
    ///
    /// Only a single-column key can be generated; a composite key fails
    /// constant evaluation.
    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        assert!(
            self.keys.len() == 1,
            "auto-increment requires exactly one key attribute"
        );
        self.auto_increment = true;
        self
    }

    /// Declares the last-modified column.
    #[must_use]
    pub const fn last_modified(mut self, column: &'static str) -> Self {
        self.last_modified = Some(column);
        self
    }

    /// Declares the default ordering.
    #[must_use]
    pub const fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy { column, direction });
        self
    }

    /// Every column, keys first.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> {
        let keys: &'static [&'static str] = self.keys;
        let attributes: &'static [&'static str] = self.attributes;
        keys.iter().chain(attributes).copied()
    }

    /// The declared spelling of `column`, if it belongs to this table.
    #[must_use]
    pub fn column(&self, column: &str) -> Option<&'static str> {
        self.columns().find(|c| *c == column)
    }

    /// Columns written by an insert.
    #[must_use]
    pub fn insert_columns(&self) -> Vec<&'static str> {
        if self.auto_increment {
            self.attributes.to_vec()
        } else {
            self.columns().collect()
        }
    }
}

/// A typed record bound to one table.
///
/// Implementors supply the descriptor, column access, and row decoding.
/// The hooks default to doing nothing.
#[async_trait]
pub trait Entity: Clone + Debug + Send + Sync + Sized + 'static {
    /// Table description.
    const DESCRIPTOR: Descriptor;

    /// Current value of a key or value column. `Null` when undecided.
    fn column(&self, name: &str) -> Value;

    /// Decodes a row of this entity's table.
    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError>;

    /// Receives the generated key after an auto-increment insert.
    fn assign_key(&mut self, _id: i64) {}

    /// Receives the current time (epoch milliseconds) before create and save.
    fn touch(&mut self, _now: i64) {}

    /// Invariants checked before any write.
    fn preconditions(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    /// Loads state that lives outside the row.
    async fn on_fetch(&mut self, _conn: &mut Connection) -> Result<(), DatabaseError> {
        Ok(())
    }

    /// Writes state that lives outside the row after an insert.
    async fn after_create(&mut self, _conn: &mut Connection) -> Result<(), DatabaseError> {
        Ok(())
    }

    /// Writes state that lives outside the row after an update.
    async fn after_save(&mut self, _conn: &mut Connection) -> Result<(), DatabaseError> {
        Ok(())
    }

    /// Releases external resources before the row is deleted.
    async fn finalize(
        &self,
        _conn: &mut Connection,
        _blobs: &BlobClient,
        _ledger: &mut RollbackLedger,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Finalizes dependent entities before the row is deleted.
    async fn cascade(
        &self,
        _conn: &mut Connection,
        _blobs: &BlobClient,
        _ledger: &mut RollbackLedger,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Entities owned by a single user.
pub trait Owned {
    /// The owning user, if the record has one.
    fn owner(&self) -> Option<i64>;
}

/// Reads and decodes one column of a row.
pub fn read<T>(row: &SqliteRow, column: &str) -> Result<T, DatabaseError>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(column)
        .map_err(|e| DatabaseError::fault(format!("failed to decode column {column}: {e}")))
}

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn require_keys<E: Entity>(entity: &E) -> Result<(), DatabaseError> {
    match E::DESCRIPTOR.keys.iter().find(|k| entity.column(k).is_null()) {
        Some(key) => Err(DatabaseError::constraint(format!(
            "{} requires key attribute {key}",
            E::DESCRIPTOR.table
        ))),
        None => Ok(()),
    }
}

fn key_clause<E: Entity>(entity: &E) -> (String, Vec<Value>) {
    let keys = E::DESCRIPTOR.keys;
    let clause = keys
        .iter()
        .map(|k| format!("{k} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ");
    (clause, keys.iter().map(|k| entity.column(k)).collect())
}

/// Create, save, and delete, provided for every [`Entity`].
#[async_trait]
pub trait Persist: Entity {
    /// Inserts the row.
    ///
    /// Auto-increment entities insert value columns only and receive the
    /// generated key; others must have every key set.
    async fn create(&mut self, conn: &mut Connection) -> Result<(), DatabaseError>;

    /// Updates the value columns of the row matching the keys.
    async fn save(&mut self, conn: &mut Connection) -> Result<(), DatabaseError>;

    /// Finalizes, cascades, then deletes the row.
    async fn delete(
        &self,
        conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), Error>;

    /// A probe matching this instance's set keys.
    fn probe(&self) -> Probe<Self>;
}

#[async_trait]
impl<E: Entity> Persist for E {
    async fn create(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        let d = E::DESCRIPTOR;
        self.preconditions()?;
        if !d.auto_increment {
            require_keys(self)?;
        }
        if d.last_modified.is_some() {
            self.touch(now_millis());
        }

        let columns = d.insert_columns();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            d.table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        let stmt = Statement::new(sql).bind_all(columns.iter().map(|c| self.column(c)));
        let result = conn.execute_one(&stmt).await?;

        if d.auto_increment {
            self.assign_key(result.last_insert_id);
        }
        debug!(table = d.table, "row created");
        self.after_create(conn).await
    }

    async fn save(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        let d = E::DESCRIPTOR;
        self.preconditions()?;
        require_keys(self)?;
        if d.last_modified.is_some() {
            self.touch(now_millis());
        }

        if !d.attributes.is_empty() {
            let (clause, key_values) = key_clause(self);
            let assignments = d
                .attributes
                .iter()
                .map(|a| format!("{a} = ?"))
                .collect::<Vec<_>>()
                .join(", ");
            let stmt = Statement::new(format!("UPDATE {} SET {assignments} WHERE {clause}", d.table))
                .bind_all(d.attributes.iter().map(|a| self.column(a)))
                .bind_all(key_values);
            conn.execute_one(&stmt).await?;
        }
        debug!(table = d.table, "row saved");
        self.after_save(conn).await
    }

    async fn delete(
        &self,
        conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), Error> {
        let d = E::DESCRIPTOR;
        self.preconditions()?;
        require_keys(self)?;

        self.finalize(conn, blobs, ledger).await?;
        self.cascade(conn, blobs, ledger).await?;

        let (clause, key_values) = key_clause(self);
        let stmt = Statement::new(format!("DELETE FROM {} WHERE {clause}", d.table)).bind_all(key_values);
        conn.execute_one(&stmt).await?;
        debug!(table = d.table, "row deleted");
        Ok(())
    }

    fn probe(&self) -> Probe<Self> {
        E::DESCRIPTOR
            .keys
            .iter()
            .map(|k| (*k, self.column(k)))
            .filter(|(_, v)| !v.is_null())
            .fold(Probe::new(), |probe, (k, v)| probe.eq(k, v))
    }
}

#[cfg(test)]
mod entity_tests;
