//! Runtime model instances.

#![allow(clippy::result_large_err)]

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, FieldError, Result, TypeError, ValidationError};
use crate::field::{FieldKind, KEY_FIELD};
use crate::model::Model;
use crate::row::Row;
use crate::value::Value;

/// One instance of a [`Model`].
///
/// A record is "saved" exactly when it has a key. Values are kept by field
/// name; foreign keys hold the referenced key, and the referenced record
/// itself when it was assigned through [`Record::set_reference`].
#[derive(Debug, Clone)]
pub struct Record {
    model: Arc<Model>,
    key: Option<i64>,
    values: BTreeMap<String, Value>,
    related: BTreeMap<String, Record>,
}

impl Record {
    /// Create an unsaved record with field defaults applied.
    pub fn new(model: Arc<Model>) -> Self {
        let values = model
            .columns()
            .filter(|f| !f.is_key())
            .map(|f| (f.name.clone(), f.default.clone().unwrap_or(Value::Null)))
            .collect();
        Self {
            model,
            key: None,
            values,
            related: BTreeMap::new(),
        }
    }

    /// Build a saved record from a fetched row.
    ///
    /// Columns missing from the row keep their defaults. Foreign keys are
    /// kept as raw keys; resolving them to records is a separate lookup.
    pub fn from_row(model: Arc<Model>, row: &Row) -> Result<Self> {
        let key = match row.get_by_name(KEY_FIELD) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.as_i64().ok_or_else(|| {
                Error::Type(TypeError {
                    expected: "integer key".to_string(),
                    actual: v.type_name().to_string(),
                    column: Some(KEY_FIELD.to_string()),
                })
            })?),
        };
        let mut record = Record::new(model);
        record.key = key;
        for (name, value) in row.iter() {
            if let Some(slot) = record.values.get_mut(name) {
                *slot = match value.as_i64() {
                    Some(k) if record.model.field(name).is_some_and(|f| f.is_foreign_key()) => {
                        Value::BigInt(k)
                    }
                    _ => value.clone(),
                };
            }
        }
        Ok(record)
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn key(&self) -> Option<i64> {
        self.key
    }

    pub fn is_saved(&self) -> bool {
        self.key.is_some()
    }

    /// Set or clear the storage key. Used by the engine after insert/delete.
    pub fn set_key(&mut self, key: Option<i64>) {
        self.key = key;
    }

    /// Identity by model and key; unsaved records are never the same.
    pub fn same_as(&self, other: &Record) -> bool {
        self.key.is_some() && self.key == other.key && self.model.is(other.model.model_name())
    }

    /// Read a column value.
    pub fn get(&self, name: &str) -> Result<&Value> {
        let field = self.model.require_field(name)?;
        if !field.is_column() || field.is_key() {
            return Err(self.field_error(name, "field is not a stored value of this record"));
        }
        Ok(self.values.get(name).unwrap_or(&Value::Null))
    }

    /// Assign a scalar value, or a raw key to a foreign key field.
    ///
    /// Collection relations are read-only; the key is assigned by the engine.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self.model.require_field(name)?;
        let value = value.into();
        match &field.kind {
            FieldKind::Key => Err(self.field_error(name, "the key is assigned by the database")),
            FieldKind::Relation(r) if !r.is_foreign_key() => {
                Err(self.field_error(name, "field is read-only"))
            }
            FieldKind::Relation(_) => {
                let key = match &value {
                    Value::Null => Value::Null,
                    v => Value::BigInt(v.as_i64().ok_or_else(|| {
                        Error::Type(TypeError {
                            expected: "record key".to_string(),
                            actual: v.type_name().to_string(),
                            column: Some(name.to_string()),
                        })
                    })?),
                };
                let key = field.validate(key)?;
                self.related.remove(name);
                self.values.insert(name.to_string(), key);
                Ok(())
            }
            FieldKind::Scalar(_) => {
                let value = field.validate(value)?;
                self.values.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    /// Assign the record referenced by a `ManyToOne`/`OneToOne` field.
    ///
    /// `target` must be a saved instance of the referenced model; only its
    /// key is stored.
    pub fn set_reference(&mut self, name: &str, target: Option<&Record>) -> Result<()> {
        let field = self.model.require_field(name)?;
        let relation = match field.relation() {
            Some(r) if r.is_foreign_key() => r,
            Some(r) if r.is_read_only() => return Err(self.field_error(name, "field is read-only")),
            _ => return Err(self.field_error(name, "field does not reference a single record")),
        };
        if let Some(target) = target {
            let expected = relation.reference().resolve(self.model.package());
            if !target.model.is(&expected) {
                return Err(Error::Type(TypeError {
                    expected: expected.to_string(),
                    actual: target.model.model_name().to_string(),
                    column: Some(name.to_string()),
                }));
            }
            if !target.is_saved() {
                return Err(Error::unsaved(target.model.name(), Some(name)));
            }
        }
        let key = field.validate(Value::key(target.and_then(Record::key)))?;
        self.values.insert(name.to_string(), key);
        match target {
            Some(target) => {
                self.related.insert(name.to_string(), target.clone());
            }
            None => {
                self.related.remove(name);
            }
        }
        Ok(())
    }

    /// Key held by a foreign key field.
    pub fn reference_key(&self, name: &str) -> Option<i64> {
        self.related
            .get(name)
            .and_then(Record::key)
            .or_else(|| self.values.get(name).and_then(Value::as_i64))
    }

    /// Record assigned through [`set_reference`](Self::set_reference), if any.
    pub fn cached_reference(&self, name: &str) -> Option<&Record> {
        self.related.get(name)
    }

    /// Column values to persist, excluding the key, in field order.
    ///
    /// Fails when a required column is empty.
    pub fn database_values(&self) -> Result<Vec<(String, Value)>> {
        let mut errors = ValidationError::new();
        let mut out = Vec::new();
        for field in self.model.columns().filter(|f| !f.is_key()) {
            let value = field.to_database_value(self);
            if field.required && value.is_empty() {
                errors.add_required(&field.name);
            }
            out.push((field.name.clone(), value));
        }
        errors.into_result()?;
        Ok(out)
    }

    /// Iterate over (field name, value) pairs of stored columns.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn field_error(&self, field: &str, message: &str) -> Error {
        Error::Field(FieldError {
            model: self.model.name().to_string(),
            field: field.to_string(),
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::registry::{Registry, Schema};

    fn schema() -> Schema {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("Contact")
                    .field(Field::string("name").required(true).size(20))
                    .field(Field::integer("age").default_value(18))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                Model::builder("Address")
                    .field(Field::string("city"))
                    .field(Field::many_to_one("contact", "Contact"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.prepare().unwrap()
    }

    #[test]
    fn new_record_is_unsaved_with_defaults() {
        let schema = schema();
        let record = Record::new(schema.get_model("Contact", "").unwrap());
        assert!(!record.is_saved());
        assert_eq!(record.get("age").unwrap(), &Value::Int(18));
        assert_eq!(record.get("name").unwrap(), &Value::Null);
    }

    #[test]
    fn set_validates_scalars() {
        let schema = schema();
        let mut record = Record::new(schema.get_model("Contact", "").unwrap());
        assert!(matches!(record.set("name", ""), Err(Error::Validation(_))));
        record.set("name", "Ada").unwrap();
        assert_eq!(record.get("name").unwrap(), &Value::from("Ada"));
        assert!(matches!(record.set("nope", 1), Err(Error::Schema(_))));
        assert!(matches!(record.set("key", 1), Err(Error::Field(_))));
    }

    #[test]
    fn collection_fields_are_read_only() {
        let schema = schema();
        let mut record = Record::new(schema.get_model("Contact", "").unwrap());
        let err = record.set("address_set", Value::Null).unwrap_err();
        assert!(matches!(err, Error::Field(ref f) if f.field == "address_set"));
        assert!(matches!(
            record.set_reference("address_set", None),
            Err(Error::Field(_))
        ));
    }

    #[test]
    fn set_reference_type_checks_and_stores_key() {
        let schema = schema();
        let mut contact = Record::new(schema.get_model("Contact", "").unwrap());
        contact.set_key(Some(7));
        let mut address = Record::new(schema.get_model("Address", "").unwrap());
        address.set_reference("contact", Some(&contact)).unwrap();
        assert_eq!(address.reference_key("contact"), Some(7));
        assert!(address.cached_reference("contact").unwrap().same_as(&contact));

        let other = Record::new(schema.get_model("Address", "").unwrap());
        let err = address.set_reference("contact", Some(&other)).unwrap_err();
        assert!(matches!(err, Error::Type(ref t) if t.expected == "Contact"));

        address.set_reference("contact", None).unwrap();
        assert_eq!(address.reference_key("contact"), None);
    }

    #[test]
    fn set_reference_rejects_unsaved_target() {
        let schema = schema();
        let contact = Record::new(schema.get_model("Contact", "").unwrap());
        let mut address = Record::new(schema.get_model("Address", "").unwrap());

        let err = address.set_reference("contact", Some(&contact)).unwrap_err();
        assert!(matches!(err, Error::Value(ref v) if v.field.as_deref() == Some("contact")));
        assert_eq!(address.reference_key("contact"), None);
        assert!(address.cached_reference("contact").is_none());
    }

    #[test]
    fn database_values_check_required_columns() {
        let schema = schema();
        let mut contact = Record::new(schema.get_model("Contact", "").unwrap());
        assert!(matches!(contact.database_values(), Err(Error::Validation(_))));
        contact.set("name", "Ada").unwrap();
        let values = contact.database_values().unwrap();
        assert_eq!(
            values,
            vec![
                ("name".to_string(), Value::from("Ada")),
                ("age".to_string(), Value::Int(18)),
            ]
        );
    }

    #[test]
    fn from_row_normalizes_foreign_keys() {
        let schema = schema();
        let row = Row::new(
            vec!["key".to_string(), "city".to_string(), "contact".to_string()],
            vec![Value::Int(3), Value::from("Oslo"), Value::Int(9)],
        );
        let record = Record::from_row(schema.get_model("Address", "").unwrap(), &row).unwrap();
        assert_eq!(record.key(), Some(3));
        assert_eq!(record.get("contact").unwrap(), &Value::BigInt(9));
        assert_eq!(record.reference_key("contact"), Some(9));
    }
}
