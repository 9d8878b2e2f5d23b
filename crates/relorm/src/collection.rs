//! Collection proxies for `OneToMany` and `ManyToMany` fields.
//!
//! A proxy is bound to one owner record and one field. Reading goes through
//! [`QuerySet`]; writing goes straight to storage.

#![allow(clippy::result_large_err)]

use std::collections::HashSet;
use std::sync::Arc;

use relorm_core::error::FieldError;
use relorm_core::{Driver, Error, Field, KEY_FIELD, Model, Record, Relation, Result};
use relorm_query::params;

use crate::database::{Database, expect_model, invalid_relation};
use crate::query::QuerySet;

/// Records removed per round trip by `clear`.
pub const CLEAR_BATCH_SIZE: i64 = 100;

const SOURCE_FIELD: &str = "source";
const TARGET_FIELD: &str = "target";

/// The records whose `ManyToOne` reverse field points at the owner.
#[derive(Debug)]
pub struct O2MSet<'db, D: Driver> {
    db: &'db Database<D>,
    owner: Record,
    field: String,
    reference: Arc<Model>,
    reverse: Field,
}

impl<'db, D: Driver> O2MSet<'db, D> {
    pub(crate) fn new(db: &'db Database<D>, owner: &Record, field: &str) -> Result<Self> {
        let model = owner.model();
        if !matches!(model.require_field(field)?.relation(), Some(Relation::OneToMany(_))) {
            return Err(invalid_relation(model, field, "is not a OneToMany"));
        }
        let (reference, reverse) = db.schema().reverse_field_of(model, field)?;
        Ok(Self {
            db,
            owner: owner.clone(),
            field: field.to_string(),
            reference,
            reverse,
        })
    }

    pub fn reference(&self) -> &Arc<Model> {
        &self.reference
    }

    /// Query over the related records.
    pub fn all(&self) -> Result<QuerySet<'db, D>> {
        self.db.query(&self.reference).filter(
            &format!("{} == :key", self.reverse.name),
            &params! { "key" => relorm_core::Value::key(self.owner.key()) },
        )
    }

    /// Point each record at the owner and save it.
    ///
    /// Records are handled in order; a failure leaves earlier ones saved.
    #[tracing::instrument(level = "debug", skip(self, records), fields(field = %self.field, count = records.len()))]
    pub fn add(&self, records: &mut [Record]) -> Result<()> {
        for record in records.iter_mut() {
            expect_model(&self.reference, record)?;
            record.set_reference(&self.reverse.name, Some(&self.owner))?;
            self.db.save(record)?;
        }
        Ok(())
    }

    /// Delete the given records from storage with one statement.
    ///
    /// Not allowed when the reverse field is required. Keys of the
    /// records are cleared.
    #[tracing::instrument(level = "debug", skip(self, records), fields(field = %self.field, count = records.len()))]
    pub fn remove(&self, records: &mut [Record]) -> Result<u64> {
        self.check_removable()?;
        for record in records.iter() {
            expect_model(&self.reference, record)?;
        }
        let keys: Vec<i64> = records.iter().filter_map(Record::key).collect();
        let deleted = self.db.delete_from_keys(&self.reference, &keys)?;
        for record in records.iter_mut() {
            record.set_key(None);
        }
        Ok(deleted)
    }

    /// Remove every related record, in batches.
    #[tracing::instrument(level = "debug", skip(self), fields(field = %self.field))]
    pub fn clear(&self) -> Result<()> {
        self.check_removable()?;
        let query = self.all()?;
        loop {
            let mut batch = query.fetch(CLEAR_BATCH_SIZE)?;
            if batch.is_empty() {
                return Ok(());
            }
            self.remove(&mut batch)?;
        }
    }

    fn check_removable(&self) -> Result<()> {
        if self.reverse.required {
            return Err(Error::Field(FieldError {
                model: self.reference.name().to_string(),
                field: self.reverse.name.clone(),
                message: format!(
                    "cannot remove from {}.{}: the reverse field is required",
                    self.owner.model().name(),
                    self.field
                ),
            }));
        }
        Ok(())
    }
}

/// The records linked to the owner through intermediary rows.
#[derive(Debug)]
pub struct M2MSet<'db, D: Driver> {
    db: &'db Database<D>,
    owner: Record,
    owner_key: i64,
    field: String,
    reference: Arc<Model>,
    link: Arc<Model>,
}

impl<'db, D: Driver> M2MSet<'db, D> {
    /// Fails when the owner has not been saved.
    pub(crate) fn new(db: &'db Database<D>, owner: &Record, field: &str) -> Result<Self> {
        let model = owner.model();
        let link = db.schema().intermediary_of(model, field)?;
        let reference = db.schema().reference_of(model, field)?;
        let owner_key = owner
            .key()
            .ok_or_else(|| Error::unsaved(model.name(), Some(field)))?;
        Ok(Self {
            db,
            owner: owner.clone(),
            owner_key,
            field: field.to_string(),
            reference,
            link,
        })
    }

    pub fn reference(&self) -> &Arc<Model> {
        &self.reference
    }

    /// The intermediary model holding the links.
    pub fn link_model(&self) -> &Arc<Model> {
        &self.link
    }

    /// Query yielding the linked records.
    pub fn all(&self) -> Result<QuerySet<'db, D>> {
        self.db.query(&self.link).filter(
            &format!("{SOURCE_FIELD} == :key"),
            &params! { "key" => self.owner_key },
        )
    }

    /// Link the records to the owner. Existing links are kept as they are.
    ///
    /// Every record is checked before anything is written.
    #[tracing::instrument(level = "debug", skip(self, records), fields(field = %self.field, count = records.len()))]
    pub fn add(&self, records: &[Record]) -> Result<()> {
        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            expect_model(&self.reference, record)?;
            let key = record
                .key()
                .ok_or_else(|| Error::unsaved(self.reference.name(), Some(&self.field)))?;
            keys.push(key);
        }
        let mut linked: HashSet<i64> = self
            .links(&keys)?
            .iter()
            .filter_map(|link| link.reference_key(TARGET_FIELD))
            .collect();
        for (record, key) in records.iter().zip(keys) {
            if !linked.insert(key) {
                continue;
            }
            let mut link = Record::new(Arc::clone(&self.link));
            link.set_reference(SOURCE_FIELD, Some(&self.owner))?;
            link.set_reference(TARGET_FIELD, Some(record))?;
            self.db.save(&mut link)?;
        }
        Ok(())
    }

    /// Unlink the records from the owner. The records themselves stay.
    #[tracing::instrument(level = "debug", skip(self, records), fields(field = %self.field, count = records.len()))]
    pub fn remove(&self, records: &[Record]) -> Result<u64> {
        for record in records {
            expect_model(&self.reference, record)?;
        }
        let keys: Vec<i64> = records.iter().filter_map(Record::key).collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let link_keys: Vec<i64> = self.links(&keys)?.iter().filter_map(Record::key).collect();
        self.db.delete_from_keys(&self.link, &link_keys)
    }

    /// Unlink every record, in batches.
    #[tracing::instrument(level = "debug", skip(self), fields(field = %self.field))]
    pub fn clear(&self) -> Result<()> {
        let query = self.all()?;
        loop {
            let batch = query.fetch(CLEAR_BATCH_SIZE)?;
            if batch.is_empty() {
                return Ok(());
            }
            self.remove(&batch)?;
        }
    }

    /// Intermediary records linking the owner to any of `targets`, in key order.
    fn links(&self, targets: &[i64]) -> Result<Vec<Record>> {
        let mut links = self
            .db
            .query(&self.link)
            .raw()
            .filter(
                &format!("{SOURCE_FIELD} == :source"),
                &params! { "source" => self.owner_key },
            )?
            .order(KEY_FIELD)?
            .fetch_in(TARGET_FIELD, targets)?;
        links.sort_by_key(Record::key);
        Ok(links)
    }
}
