//! Database handle: connection lifecycle, DDL and record persistence.

#![allow(clippy::result_large_err)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;

use relorm_core::error::{QueryError, QueryErrorKind, SchemaError, SchemaErrorKind};
use relorm_core::{
    Connection, Cursor, DatabaseConfig, Dialect, Driver, Error, Model, Record, Relation, Result,
    Row, Schema, Value,
};
use relorm_query::{Query, delete_sql, insert_sql, update_sql};
use relorm_schema::{DdlGenerator, create_order, generator_for_dialect};

use crate::collection::{M2MSet, O2MSet};
use crate::query::{KEY_BATCH_SIZE, QuerySet};

/// A prepared schema bound to one storage connection.
///
/// The connection is opened on first use and reused until [`close`](Self::close).
/// A handle is meant for a single thread of work.
pub struct Database<D: Driver> {
    driver: D,
    config: DatabaseConfig,
    schema: Arc<Schema>,
    connection: RefCell<Option<D::Connection>>,
    pub(crate) in_transaction: Cell<bool>,
}

impl<D: Driver> std::fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("models", &self.schema.models().len())
            .field("connected", &self.connection.borrow().is_some())
            .field("in_transaction", &self.in_transaction.get())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Database<D> {
    pub fn new(driver: D, config: DatabaseConfig, schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            driver,
            config,
            schema: schema.into(),
            connection: RefCell::new(None),
            in_transaction: Cell::new(false),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.config.engine.dialect()
    }

    /// Open the connection if it is not open yet.
    pub fn connect(&self) -> Result<()> {
        let mut slot = self.connection.borrow_mut();
        if slot.is_none() {
            tracing::info!(engine = %self.config.engine, name = %self.config.name, "connecting");
            *slot = Some(self.driver.connect(&self.config)?);
        }
        Ok(())
    }

    /// Close the connection. The next operation reconnects.
    pub fn close(&self) -> Result<()> {
        let connection = self.connection.borrow_mut().take();
        self.in_transaction.set(false);
        match connection {
            Some(conn) => conn.close(),
            None => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.borrow().is_some()
    }

    pub(crate) fn with_connection<T>(&self, f: impl FnOnce(&D::Connection) -> Result<T>) -> Result<T> {
        self.connect()?;
        let slot = self.connection.borrow();
        match slot.as_ref() {
            Some(conn) => f(conn),
            None => Err(Error::Connection(relorm_core::error::ConnectionError {
                kind: relorm_core::error::ConnectionErrorKind::Closed,
                message: "connection is not open".to_string(),
                source: None,
            })),
        }
    }

    /// Execute one statement with `%s` placeholders.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<Cursor> {
        tracing::trace!(sql, params = params.len(), "execute");
        self.with_connection(|conn| conn.execute(sql, params))
    }

    /// Start a transaction on the connection.
    pub fn begin(&self) -> Result<()> {
        self.with_connection(|conn| conn.begin())?;
        self.in_transaction.set(true);
        Ok(())
    }

    /// Commit the active transaction. Without an open connection this does nothing.
    ///
    /// The transaction stays active when the commit fails.
    pub fn commit(&self) -> Result<()> {
        if let Some(conn) = self.connection.borrow().as_ref() {
            conn.commit()?;
        }
        self.in_transaction.set(false);
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.in_transaction.set(false);
        match self.connection.borrow().as_ref() {
            Some(conn) => conn.rollback(),
            None => Ok(()),
        }
    }

    // ========================================================================
    // DDL
    // ========================================================================

    pub fn generator(&self) -> Box<dyn DdlGenerator> {
        generator_for_dialect(self.dialect())
    }

    /// Column definition for one field, `None` for fields without a column.
    pub fn get_field_sql(&self, model: &Model, field: &str) -> Result<Option<String>> {
        let field = model.require_field(field)?;
        self.generator().field_sql(&self.schema, model, field)
    }

    pub fn get_create_sql(&self, model: &Model) -> Result<String> {
        self.generator().create_sql(&self.schema, model)
    }

    pub fn exists_table(&self, table: &str) -> Result<bool> {
        let sql = self.generator().exists_sql();
        let mut cursor = self.execute(sql, &[Value::from(table)])?;
        Ok(cursor.fetchone().is_some())
    }

    /// Create the model's table unless it exists. Returns whether it was created.
    pub fn create_table(&self, model: &Model) -> Result<bool> {
        if self.exists_table(model.table())? {
            return Ok(false);
        }
        let sql = self.get_create_sql(model)?;
        self.execute(&sql, &[])?;
        tracing::info!(table = model.table(), "created table");
        Ok(true)
    }

    /// Drop a table if it exists. Returns whether it was dropped.
    pub fn drop_table(&self, table: &str) -> Result<bool> {
        if !self.exists_table(table)? {
            return Ok(false);
        }
        self.execute(&self.generator().drop_sql(table), &[])?;
        tracing::info!(table, "dropped table");
        Ok(true)
    }

    /// Rename `old_name` to the model's table when the old table exists.
    pub fn alter_table(&self, model: &Model, old_name: Option<&str>) -> Result<()> {
        let Some(old) = old_name else {
            return Ok(());
        };
        if old == model.table() || !self.exists_table(old)? {
            return Ok(());
        }
        self.execute(&self.generator().rename_sql(old, model.table()), &[])?;
        tracing::info!(from = old, to = model.table(), "renamed table");
        Ok(())
    }

    /// Create every table of the schema, referenced tables first.
    pub fn create_all(&self) -> Result<()> {
        for model in create_order(&self.schema) {
            self.create_table(&model)?;
        }
        Ok(())
    }

    pub fn drop_all(&self) -> Result<()> {
        for model in create_order(&self.schema).iter().rev() {
            self.drop_table(model.table())?;
        }
        Ok(())
    }

    // ========================================================================
    // Records
    // ========================================================================

    pub fn model(&self, name: &str, package: &str) -> Result<Arc<Model>> {
        self.schema.get_model(name, package)
    }

    pub fn new_record(&self, model: &Arc<Model>) -> Record {
        Record::new(Arc::clone(model))
    }

    /// Insert or update the record depending on whether it has a key.
    pub fn save(&self, record: &mut Record) -> Result<i64> {
        self.insert_record(record)
    }

    /// Insert an unsaved record and assign its key. Saved records are updated instead.
    pub fn insert_record(&self, record: &mut Record) -> Result<i64> {
        if record.is_saved() {
            return self.update_record(record);
        }
        let (columns, values): (Vec<String>, Vec<Value>) =
            record.database_values()?.into_iter().unzip();
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        let model = Arc::clone(record.model());
        let table = model.table();
        let sql = insert_sql(self.dialect(), table, &columns);
        let cursor = self.execute(&sql, &values)?;
        let key = cursor.lastrowid().ok_or_else(|| {
            Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql.clone()),
                message: format!("no key was generated for {table}"),
                source: None,
            })
        })?;
        record.set_key(Some(key));
        tracing::debug!(table, key, "inserted");
        Ok(key)
    }

    /// Write a saved record's columns. Unsaved records are inserted instead.
    pub fn update_record(&self, record: &mut Record) -> Result<i64> {
        let Some(key) = record.key() else {
            return self.insert_record(record);
        };
        let (columns, mut values): (Vec<String>, Vec<Value>) =
            record.database_values()?.into_iter().unzip();
        if columns.is_empty() {
            return Ok(key);
        }
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        let table = record.model().table();
        let sql = update_sql(self.dialect(), table, &columns);
        values.push(Value::BigInt(key));
        self.execute(&sql, &values)?;
        tracing::debug!(table, key, "updated");
        Ok(key)
    }

    pub fn update_records(&self, records: &mut [Record]) -> Result<()> {
        for record in records {
            self.update_record(record)?;
        }
        Ok(())
    }

    /// Delete a saved record and clear its key. Unsaved records are left alone.
    pub fn delete_record(&self, record: &mut Record) -> Result<bool> {
        let Some(key) = record.key() else {
            return Ok(false);
        };
        let deleted = self.delete_from_keys(record.model(), &[key])?;
        record.set_key(None);
        Ok(deleted > 0)
    }

    /// Delete saved records of one model with a single statement.
    pub fn delete_records(&self, records: &mut [Record]) -> Result<u64> {
        let Some(model) = records.first().map(|r| Arc::clone(r.model())) else {
            return Ok(0);
        };
        for record in records.iter() {
            expect_model(&model, record)?;
        }
        let keys: Vec<i64> = records.iter().filter_map(Record::key).collect();
        let deleted = self.delete_from_keys(&model, &keys)?;
        for record in records.iter_mut() {
            record.set_key(None);
        }
        Ok(deleted)
    }

    /// Delete rows of `model` by key. An empty key list issues no statement.
    ///
    /// Long key lists are split into statements of [`KEY_BATCH_SIZE`] keys.
    pub fn delete_from_keys(&self, model: &Model, keys: &[i64]) -> Result<u64> {
        let mut deleted = 0;
        for chunk in keys.chunks(KEY_BATCH_SIZE) {
            let sql = delete_sql(self.dialect(), model.table(), chunk.len());
            let params: Vec<Value> = chunk.iter().copied().map(Value::BigInt).collect();
            let cursor = self.execute(&sql, &params)?;
            tracing::debug!(table = model.table(), keys = chunk.len(), deleted = cursor.rowcount(), "deleted");
            deleted += cursor.rowcount();
        }
        Ok(deleted)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Start a query over the model's table.
    pub fn query(&self, model: &Arc<Model>) -> QuerySet<'_, D> {
        QuerySet::new(self, Arc::clone(model))
    }

    /// Load one record by key.
    ///
    /// Intermediary models come back as stored, not as their targets.
    pub fn get(&self, model: &Arc<Model>, key: i64) -> Result<Option<Record>> {
        self.query(model)
            .raw()
            .filter(
                &format!("{} == :key", relorm_core::KEY_FIELD),
                &relorm_query::params! { "key" => key },
            )?
            .first()
    }

    /// Load records by key, in the order of `keys`. Keys without a row are skipped.
    ///
    /// Like [`get`](Self::get), intermediary models come back as stored.
    pub fn get_many(&self, model: &Arc<Model>, keys: &[i64]) -> Result<Vec<Record>> {
        let by_key = self.query(model).raw().keyed(keys)?;
        Ok(keys.iter().filter_map(|key| by_key.get(key).cloned()).collect())
    }

    pub(crate) fn select_rows(&self, query: &Query, limit: i64, offset: Option<u64>) -> Result<Vec<Row>> {
        let (sql, params) = query.select_sql(self.dialect(), limit, offset);
        Ok(self.execute(&sql, &params)?.fetchall())
    }

    /// Run a query and return rows as column-name maps.
    pub fn select_from(
        &self,
        query: &Query,
        limit: i64,
        offset: Option<u64>,
    ) -> Result<Vec<BTreeMap<String, Value>>> {
        Ok(self
            .select_rows(query, limit, offset)?
            .iter()
            .map(Row::to_map)
            .collect())
    }

    /// Count rows matching a query.
    ///
    /// A result without a readable count yields 0.
    pub fn select_count(&self, query: &Query) -> Result<u64> {
        let (sql, params) = query.count_sql(self.dialect());
        let mut cursor = self.execute(&sql, &params)?;
        let count = cursor
            .fetchone()
            .and_then(|row| row.get(0).and_then(Value::as_i64))
            .and_then(|n| u64::try_from(n).ok());
        match count {
            Some(n) => Ok(n),
            None => {
                tracing::warn!(table = query.table(), "count returned no value");
                Ok(0)
            }
        }
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// Record referenced by a `ManyToOne`/`OneToOne` field, loaded by key.
    pub fn reference(&self, record: &Record, field: &str) -> Result<Option<Record>> {
        let model = record.model();
        require_foreign_key(model, field)?;
        match record.reference_key(field) {
            Some(key) => {
                let target = self.schema.reference_of(model, field)?;
                self.get(&target, key)
            }
            None => Ok(None),
        }
    }

    /// Turn a stored foreign key value into the referenced record.
    pub fn from_database_value(&self, model: &Model, field: &str, value: &Value) -> Result<Option<Record>> {
        require_foreign_key(model, field)?;
        if value.is_null() {
            return Ok(None);
        }
        let key = value.as_i64().ok_or_else(|| {
            Error::Type(relorm_core::error::TypeError {
                expected: "integer key".to_string(),
                actual: value.type_name().to_string(),
                column: Some(field.to_string()),
            })
        })?;
        let target = self.schema.reference_of(model, field)?;
        self.get(&target, key)
    }

    /// Records referencing `record` through the reverse of a `OneToMany` field.
    pub fn one_to_many(&self, record: &Record, field: &str) -> Result<O2MSet<'_, D>> {
        O2MSet::new(self, record, field)
    }

    /// Records linked to `record` through a `ManyToMany` field.
    pub fn many_to_many(&self, record: &Record, field: &str) -> Result<M2MSet<'_, D>> {
        M2MSet::new(self, record, field)
    }

    /// The single record on the other side of a reverse `OneToOne` field.
    ///
    /// Fails with a not-found error when nothing references `record`.
    pub fn one_to_one(&self, record: &Record, field: &str) -> Result<Record> {
        let (reference, forward) = self.one_to_one_reverse(record, field)?;
        let found = self
            .query(&reference)
            .filter(
                &format!("{} == :key", forward),
                &relorm_query::params! { "key" => Value::key(record.key()) },
            )?
            .fetch(1)?
            .into_iter()
            .next();
        found.ok_or_else(|| {
            Error::Query(QueryError {
                kind: QueryErrorKind::NotFound,
                sql: None,
                message: format!(
                    "no {} references {} {:?}",
                    reference.name(),
                    record.model().name(),
                    record.key()
                ),
                source: None,
            })
        })
    }

    /// Point `other` at `record` through a reverse `OneToOne` field.
    ///
    /// Only `other` is modified; saving it is up to the caller.
    pub fn set_one_to_one(&self, record: &Record, field: &str, other: &mut Record) -> Result<()> {
        let (reference, forward) = self.one_to_one_reverse(record, field)?;
        expect_model(&reference, other)?;
        other.set_reference(&forward, Some(record))
    }

    fn one_to_one_reverse(&self, record: &Record, field: &str) -> Result<(Arc<Model>, String)> {
        let model = record.model();
        match model.require_field(field)?.relation() {
            Some(Relation::OneToOneReverse(_)) => {
                let (reference, forward) = self.schema.reverse_field_of(model, field)?;
                Ok((reference, forward.name))
            }
            _ => Err(invalid_relation(model, field, "is not a reverse OneToOne")),
        }
    }
}

pub(crate) fn invalid_relation(model: &Model, field: &str, what: &str) -> Error {
    Error::Schema(SchemaError {
        kind: SchemaErrorKind::Invalid,
        message: format!("{}.{} {}", model.name(), field, what),
    })
}

fn require_foreign_key(model: &Model, field: &str) -> Result<()> {
    if model.require_field(field)?.is_foreign_key() {
        Ok(())
    } else {
        Err(invalid_relation(model, field, "does not reference a single record"))
    }
}

pub(crate) fn expect_model(expected: &Model, record: &Record) -> Result<()> {
    if record.model().is(expected.model_name()) {
        Ok(())
    } else {
        Err(Error::wrong_model(
            expected.model_name().to_string(),
            record.model().model_name().to_string(),
        ))
    }
}
