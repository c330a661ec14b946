//! Synchronous engine primitives.
//!
//! [`Executor`] borrows a connection and exposes the only operations the rest
//! of the crate (and migration steps) may perform against it. Results come
//! back as plain values: a [`Row`] never keeps a reference to the statement
//! or the connection it was read from.

use std::sync::Arc;

use rusqlite::types::{FromSql, Value, ValueRef};
use rusqlite::{Connection, params_from_iter};

use crate::errors::{Result, StoreError};

/// Positional statement parameters (`?1`, `?2`, ...).
pub type Params = Vec<Value>;

/// One result row: column names plus owned cell values.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Column names in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Cell values in select order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of the first column named `column`.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Typed value of the first column named `column`.
    pub fn get<T: FromSql>(&self, column: &str) -> Result<T> {
        let value = self.value(column).ok_or_else(|| StoreError::Column {
            column: column.to_owned(),
            detail: "no such column".into(),
        })?;
        T::column_result(ValueRef::from(value)).map_err(|e| StoreError::Column {
            column: column.to_owned(),
            detail: e.to_string(),
        })
    }
}

/// Outcome of a data-modifying statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Rows changed by the statement.
    pub changes: usize,
    /// Rowid of the most recent successful insert on this connection.
    pub last_insert_rowid: i64,
}

/// Engine primitives over a borrowed connection.
pub struct Executor<'c> {
    conn: &'c Connection,
}

impl<'c> Executor<'c> {
    /// Wrap a connection.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// First row of `sql`, if any.
    pub fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params, true)?.pop())
    }

    /// Every row of `sql`.
    pub fn all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query(sql, params, false)
    }

    /// Execute one data-modifying statement.
    pub fn run(&self, sql: &str, params: &[Value]) -> Result<RunResult> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let changes = stmt.execute(params_from_iter(params))?;
        Ok(RunResult {
            changes,
            last_insert_rowid: self.conn.last_insert_rowid(),
        })
    }

    /// Execute several `;`-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Whether an explicit transaction is open on the connection.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub(crate) fn connection(&self) -> &'c Connection {
        self.conn
    }

    fn query(&self, sql: &str, params: &[Value], first_only: bool) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();

        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(Row::new(Arc::clone(&columns), values));
            if first_only {
                break;
            }
        }
        Ok(out)
    }
}
