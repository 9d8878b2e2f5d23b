//! Storage engine boundary.
//!
//! Drivers implement [`Driver`] to open a [`Connection`]. All operations are
//! synchronous; statements use `%s` positional placeholders and
//! double-quoted identifiers, and drivers translate them to their native
//! form.

#![allow(clippy::result_large_err)]

use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::row::{ColumnInfo, Row};
use crate::value::Value;

/// SQL dialect spoken by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Quote an identifier, doubling embedded quotes.
    pub fn quote_identifier(self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Buffered result of one executed statement.
///
/// A cursor owns everything it returned, so the connection is free again as
/// soon as `execute` returns.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    columns: Arc<ColumnInfo>,
    rows: Vec<Row>,
    position: usize,
    rowcount: u64,
    lastrowid: Option<i64>,
}

impl Cursor {
    /// Cursor for a statement that returned rows.
    pub fn with_rows(columns: Arc<ColumnInfo>, rows: Vec<Row>) -> Self {
        let rowcount = rows.len() as u64;
        Self {
            columns,
            rows,
            position: 0,
            rowcount,
            lastrowid: None,
        }
    }

    /// Cursor for a statement that changed rows.
    pub fn with_changes(rowcount: u64, lastrowid: Option<i64>) -> Self {
        Self {
            rowcount,
            lastrowid,
            ..Self::default()
        }
    }

    /// Names of the result columns.
    pub fn description(&self) -> &[String] {
        self.columns.names()
    }

    /// Rows returned or changed by the statement.
    pub fn rowcount(&self) -> u64 {
        self.rowcount
    }

    /// Key generated by the last INSERT, if any.
    pub fn lastrowid(&self) -> Option<i64> {
        self.lastrowid
    }

    pub fn fetchone(&mut self) -> Option<Row> {
        let row = self.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        row
    }

    /// Take all rows not fetched yet.
    pub fn fetchall(&mut self) -> Vec<Row> {
        let rest = self.rows.split_off(self.position.min(self.rows.len()));
        self.position = self.rows.len();
        rest
    }
}

/// An open connection to a database.
pub trait Connection {
    fn dialect(&self) -> Dialect;

    /// Execute one statement with `%s` placeholders bound to `params`.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<Cursor>;

    /// Start an explicit transaction.
    fn begin(&self) -> Result<()>;

    /// Commit the current transaction; a no-op without one.
    fn commit(&self) -> Result<()>;

    /// Roll back the current transaction; a no-op without one.
    fn rollback(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Opens connections for a [`DatabaseConfig`].
pub trait Driver {
    type Connection: Connection;

    fn connect(&self, config: &DatabaseConfig) -> Result<Self::Connection>;
}
