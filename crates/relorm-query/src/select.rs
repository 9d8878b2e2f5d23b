//! SELECT statements over one table.

#![allow(clippy::result_large_err)]

use relorm_core::{Dialect, Error, KEY_FIELD, Result, Value};

use crate::parser::{self, Filter, Params};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// ORDER BY clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Parse `"column"` or `"-column"` (descending).
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (column, direction) = match spec.strip_prefix('-') {
            Some(column) => (column, OrderDirection::Desc),
            None => (spec, OrderDirection::Asc),
        };
        if column.is_empty() || !column.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(Error::Query(relorm_core::error::QueryError::syntax(format!(
                "invalid order specification '{spec}'"
            ))));
        }
        Ok(Self {
            column: column.to_string(),
            direction,
        })
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let direction = match self.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        format!(
            "ORDER BY {} {}",
            dialect.quote_identifier(&self.column),
            direction
        )
    }
}

/// A filtered, ordered view of one table.
///
/// Building a query runs nothing; the statement text is produced on demand
/// so the same query can be fetched again.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    filters: Vec<Filter>,
    order: Option<OrderBy>,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Add a filter; successive filters are combined with AND.
    pub fn filter(mut self, query: &str, params: &Params) -> Result<Self> {
        self.filters.push(parser::parse(query, params)?);
        Ok(self)
    }

    /// Order by `spec`, a column name optionally prefixed with `-`.
    pub fn order(mut self, spec: &str) -> Result<Self> {
        self.order = Some(OrderBy::parse(spec)?);
        Ok(self)
    }

    /// Bindings of every filter, in placeholder order.
    pub fn bindings(&self) -> Vec<Value> {
        self.filters
            .iter()
            .flat_map(|f| f.bindings.iter().cloned())
            .collect()
    }

    fn base(&self, what: &str, dialect: Dialect) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}",
            what,
            dialect.quote_identifier(&self.table)
        );
        if !self.filters.is_empty() {
            let clauses: Vec<String> = self
                .filters
                .iter()
                .map(|f| format!("({})", f.to_sql(dialect)))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql
    }

    /// Build the row SELECT.
    ///
    /// A negative `limit` means no limit.
    pub fn select_sql(&self, dialect: Dialect, limit: i64, offset: Option<u64>) -> (String, Vec<Value>) {
        let mut sql = self.base("*", dialect);
        if let Some(order) = &self.order {
            sql.push(' ');
            sql.push_str(&order.to_sql(dialect));
        }
        if limit >= 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        } else if offset.is_some() {
            // OFFSET needs a LIMIT clause in front of it
            sql.push_str(match dialect {
                Dialect::Sqlite => " LIMIT -1",
                Dialect::Postgres => " LIMIT ALL",
            });
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        (sql, self.bindings())
    }

    /// Build the `count(...)` SELECT.
    pub fn count_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let what = format!("count({})", dialect.quote_identifier(KEY_FIELD));
        (self.base(&what, dialect), self.bindings())
    }
}
