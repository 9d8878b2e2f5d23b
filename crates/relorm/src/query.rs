//! Restartable record queries.

#![allow(clippy::result_large_err)]

use std::collections::HashMap;
use std::sync::Arc;

use relorm_core::{Driver, KEY_FIELD, Model, Record, Result, Value};
use relorm_query::{Params, Query, params};

use crate::database::Database;

/// Name of the intermediary field pointing at the many-to-many target.
const TARGET_FIELD: &str = "target";

/// Most keys bound into one `in` filter.
pub const KEY_BATCH_SIZE: usize = 500;

/// A filtered, ordered query over one model's table.
///
/// Nothing runs until a fetch method is called, and every fetch re-runs the
/// statement. Queries over an intermediary model yield the target records
/// the links point at, unless [`raw`](Self::raw) is used.
#[derive(Debug)]
pub struct QuerySet<'db, D: Driver> {
    db: &'db Database<D>,
    model: Arc<Model>,
    query: Query,
    targets: bool,
}

impl<D: Driver> Clone for QuerySet<'_, D> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            model: Arc::clone(&self.model),
            query: self.query.clone(),
            targets: self.targets,
        }
    }
}

impl<'db, D: Driver> QuerySet<'db, D> {
    pub(crate) fn new(db: &'db Database<D>, model: Arc<Model>) -> Self {
        let targets = model.is_intermediary();
        let query = Query::new(model.table());
        Self {
            db,
            model,
            query,
            targets,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Fetch intermediary records as stored instead of their targets.
    pub fn raw(mut self) -> Self {
        self.targets = false;
        self
    }

    /// Add a filter such as `name == :name and age >= :age`.
    pub fn filter(mut self, query: &str, params: &Params) -> Result<Self> {
        self.query = self.query.filter(query, params)?;
        Ok(self)
    }

    /// Order by `column`, or `-column` for descending.
    pub fn order(mut self, spec: &str) -> Result<Self> {
        self.query = self.query.order(spec)?;
        Ok(self)
    }

    /// Fetch up to `limit` records; a negative limit fetches all.
    pub fn fetch(&self, limit: i64) -> Result<Vec<Record>> {
        self.fetch_range(limit, None)
    }

    pub fn fetch_all(&self) -> Result<Vec<Record>> {
        self.fetch_range(-1, None)
    }

    pub fn fetch_range(&self, limit: i64, offset: Option<u64>) -> Result<Vec<Record>> {
        let rows = self.db.select_rows(&self.query, limit, offset)?;
        let records = rows
            .iter()
            .map(|row| Record::from_row(Arc::clone(&self.model), row))
            .collect::<Result<Vec<_>>>()?;
        if self.targets {
            self.resolve_targets(&records)
        } else {
            Ok(records)
        }
    }

    pub fn first(&self) -> Result<Option<Record>> {
        Ok(self.fetch(1)?.into_iter().next())
    }

    pub fn count(&self) -> Result<u64> {
        self.db.select_count(&self.query)
    }

    /// Matching rows as column-name maps.
    pub fn rows(&self, limit: i64) -> Result<Vec<std::collections::BTreeMap<String, Value>>> {
        self.db.select_from(&self.query, limit, None)
    }

    /// Fetch the records whose `column` is one of `keys`, binding at most
    /// [`KEY_BATCH_SIZE`] keys per statement.
    pub(crate) fn fetch_in(&self, column: &str, keys: &[i64]) -> Result<Vec<Record>> {
        let filter = format!("{column} in :keys");
        let mut out = Vec::new();
        for chunk in keys.chunks(KEY_BATCH_SIZE) {
            let batch = self
                .clone()
                .filter(&filter, &params! { "keys" => chunk.to_vec() })?
                .fetch_all()?;
            out.extend(batch);
        }
        Ok(out)
    }

    /// Records with the given keys, indexed by key. Repeated keys are looked up once.
    pub(crate) fn keyed(&self, keys: &[i64]) -> Result<HashMap<i64, Record>> {
        let mut unique = keys.to_vec();
        unique.sort_unstable();
        unique.dedup();
        Ok(self
            .fetch_in(KEY_FIELD, &unique)?
            .into_iter()
            .filter_map(|record| record.key().map(|key| (key, record)))
            .collect())
    }

    /// Load the targets of intermediary records, keeping link order.
    fn resolve_targets(&self, links: &[Record]) -> Result<Vec<Record>> {
        let keys: Vec<i64> = links
            .iter()
            .filter_map(|link| link.reference_key(TARGET_FIELD))
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let target = self.db.schema().reference_of(&self.model, TARGET_FIELD)?;
        let by_key = self.db.query(&target).keyed(&keys)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match by_key.get(&key) {
                Some(record) => out.push(record.clone()),
                None => tracing::warn!(table = target.table(), key, "link points at a missing record"),
            }
        }
        Ok(out)
    }
}
