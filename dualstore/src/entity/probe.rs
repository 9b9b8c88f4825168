//! Partial-match reads.

use super::{Direction, Entity, OrderBy};
use crate::db::{Connection, DatabaseError, Statement, Value};
use std::marker::PhantomData;

/// A query template matching rows by whichever columns are set.
///
/// `Null` filters match `IS NULL`. Columns outside the entity's table are
/// rejected when the probe runs.
#[derive(Debug, Clone)]
pub struct Probe<E> {
    filters: Vec<(&'static str, Value)>,
    patterns: Vec<(&'static str, String)>,
    unknown: Vec<String>,
    order: Option<OrderBy>,
    then: Option<OrderBy>,
    limit: Option<u32>,
    offset: Option<u32>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for Probe<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Probe<E> {
    /// A probe with no filters; matches every row.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            patterns: Vec::new(),
            unknown: Vec::new(),
            order: None,
            then: None,
            limit: None,
            offset: None,
            _entity: PhantomData,
        }
    }

    /// Requires `column` to equal `value`.
    #[must_use]
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        match E::DESCRIPTOR.column(column) {
            Some(column) => self.filters.push((column, value.into())),
            None => self.unknown.push(column.to_string()),
        }
        self
    }

    /// Requires `column` to match the SQL `LIKE` pattern.
    #[must_use]
    pub fn like(mut self, column: &str, pattern: impl Into<String>) -> Self {
        match E::DESCRIPTOR.column(column) {
            Some(column) => self.patterns.push((column, pattern.into())),
            None => self.unknown.push(column.to_string()),
        }
        self
    }

    /// Orders results, overriding the descriptor default.
    #[must_use]
    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        match E::DESCRIPTOR.column(column) {
            Some(column) => self.order = Some(OrderBy { column, direction }),
            None => self.unknown.push(column.to_string()),
        }
        self
    }

    /// Breaks ties left by [`order_by`](Self::order_by).
    #[must_use]
    pub fn then_by(mut self, column: &str, direction: Direction) -> Self {
        match E::DESCRIPTOR.column(column) {
            Some(column) => self.then = Some(OrderBy { column, direction }),
            None => self.unknown.push(column.to_string()),
        }
        self
    }

    /// Caps the number of rows returned.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` rows.
    #[must_use]
    pub const fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The accepted filters.
    #[must_use]
    pub fn filters(&self) -> &[(&'static str, Value)] {
        &self.filters
    }

    /// Returns true if no filter is set.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.filters.is_empty() && self.patterns.is_empty()
    }

    fn where_clause(&self) -> Result<(String, Vec<Value>), DatabaseError> {
        if let Some(column) = self.unknown.first() {
            return Err(DatabaseError::fault(format!(
                "{} has no column {column}",
                E::DESCRIPTOR.table
            )));
        }
        if self.is_unconstrained() {
            return Ok((String::new(), Vec::new()));
        }

        let mut params = Vec::new();
        let mut conditions: Vec<String> = self
            .filters
            .iter()
            .map(|(column, value)| {
                if value.is_null() {
                    format!("{column} IS NULL")
                } else {
                    params.push(value.clone());
                    format!("{column} = ?")
                }
            })
            .collect();
        for (column, pattern) in &self.patterns {
            params.push(Value::from(pattern));
            conditions.push(format!("{column} LIKE ?"));
        }
        Ok((format!(" WHERE {}", conditions.join(" AND ")), params))
    }

    /// Renders the `SELECT` this probe runs for [`fetch_all`](Self::fetch_all).
    pub fn select_statement(&self) -> Result<Statement, DatabaseError> {
        let (clause, params) = self.where_clause()?;
        let mut sql = format!("SELECT * FROM {}{clause}", E::DESCRIPTOR.table);
        if let Some(order) = self.order.or(E::DESCRIPTOR.order_by) {
            sql.push_str(&format!(" ORDER BY {}", order.sql()));
            if let Some(then) = self.then {
                sql.push_str(&format!(", {}", then.sql()));
            }
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok(Statement::new(sql).bind_all(params))
    }

    async fn materialize(row: &sqlx::sqlite::SqliteRow, conn: &mut Connection) -> Result<E, DatabaseError> {
        let mut entity = E::from_row(row)?;
        entity.on_fetch(conn).await?;
        Ok(entity)
    }

    /// At most one match; more than one is [`QueryAmbiguous`](crate::db::DbErrorKind::QueryAmbiguous).
    pub async fn fetch(&self, conn: &mut Connection) -> Result<Option<E>, DatabaseError> {
        let stmt = self.select_statement()?;
        match conn.query_binary(&stmt).await? {
            Some(row) => Ok(Some(Self::materialize(&row, conn).await?)),
            None => Ok(None),
        }
    }

    /// Exactly one match; none is [`NoSuchEntry`](crate::db::DbErrorKind::NoSuchEntry).
    pub async fn fetch_one(&self, conn: &mut Connection) -> Result<E, DatabaseError> {
        let stmt = self.select_statement()?;
        let row = conn.query_one(&stmt).await?;
        Self::materialize(&row, conn).await
    }

    /// Every match, in the probe's or the descriptor's order.
    pub async fn fetch_all(&self, conn: &mut Connection) -> Result<Vec<E>, DatabaseError> {
        let stmt = self.select_statement()?;
        let rows = conn.query_any(&stmt).await?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(Self::materialize(row, conn).await?);
        }
        Ok(entities)
    }

    /// Whether any row matches, without decoding one.
    pub async fn exists(&self, conn: &mut Connection) -> Result<bool, DatabaseError> {
        let (clause, params) = self.where_clause()?;
        let stmt = Statement::new(format!(
            "SELECT EXISTS (SELECT 1 FROM {}{clause}) AS present",
            E::DESCRIPTOR.table
        ))
        .bind_all(params);
        let row = conn.query_one(&stmt).await?;
        Ok(super::read::<i64>(&row, "present")? != 0)
    }

    /// Number of matching rows.
    pub async fn count(&self, conn: &mut Connection) -> Result<i64, DatabaseError> {
        let (clause, params) = self.where_clause()?;
        let stmt = Statement::new(format!(
            "SELECT COUNT(*) AS total FROM {}{clause}",
            E::DESCRIPTOR.table
        ))
        .bind_all(params);
        let row = conn.query_one(&stmt).await?;
        super::read::<i64>(&row, "total")
    }
}
