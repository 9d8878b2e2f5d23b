//! Field descriptors.

#![allow(clippy::result_large_err)]

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result, ValidationError};
use crate::record::Record;
use crate::relation::{ForeignKey, ManyToMany, ModelRef, OnDelete, Relation, Reverse};
use crate::types::DataType;
use crate::value::Value;

/// Name of the implicit primary key field every model carries.
pub const KEY_FIELD: &str = "key";

/// Custom validation hook. Returns a human readable message on rejection.
pub type Validator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// What a field stores.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// The implicit primary key.
    Key,
    Scalar(DataType),
    Relation(Relation),
}

/// Metadata about a model field.
#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    pub indexed: bool,
    /// Maximum length for strings
    pub size: Option<u32>,
    pub default: Option<Value>,
    pub pattern: Option<Regex>,
    validator: Option<Validator>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("unique", &self.unique)
            .field("size", &self.size)
            .field("default", &self.default)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

fn make_label(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl Field {
    fn with_kind(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            label: make_label(&name),
            name,
            kind,
            required: false,
            unique: false,
            indexed: false,
            size: None,
            default: None,
            pattern: None,
            validator: None,
        }
    }

    /// Create a scalar field of the given storage type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self::with_kind(name, FieldKind::Scalar(data_type))
    }

    pub(crate) fn key() -> Self {
        Self::with_kind(KEY_FIELD, FieldKind::Key)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, DataType::String)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Float)
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Decimal)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Boolean)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, DataType::DateTime)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Date)
    }

    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Time)
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Binary)
    }

    /// Many-to-one reference to another model.
    ///
    /// Prepare adds a `OneToMany` field named `<owner>_set` to the referenced
    /// model unless [`reverse_name`](Self::reverse_name) says otherwise.
    pub fn many_to_one(name: impl Into<String>, reference: impl Into<ModelRef>) -> Self {
        Self::with_kind(
            name,
            FieldKind::Relation(Relation::ManyToOne(ForeignKey {
                reference: reference.into(),
                reverse_name: None,
                on_delete: OnDelete::default(),
            })),
        )
    }

    /// One-to-one reference: a unique many-to-one whose reverse is named
    /// after the owner model.
    pub fn one_to_one(name: impl Into<String>, reference: impl Into<ModelRef>) -> Self {
        let mut field = Self::with_kind(
            name,
            FieldKind::Relation(Relation::OneToOne(ForeignKey {
                reference: reference.into(),
                reverse_name: None,
                on_delete: OnDelete::default(),
            })),
        );
        field.unique = true;
        field
    }

    /// One-to-many collection; prepare adds the backing `ManyToOne` to the
    /// referenced model when it is missing.
    pub fn one_to_many(name: impl Into<String>, reference: impl Into<ModelRef>) -> Self {
        Self::with_kind(
            name,
            FieldKind::Relation(Relation::OneToMany(Reverse {
                reference: reference.into(),
                reverse_name: None,
            })),
        )
    }

    pub(crate) fn one_to_one_reverse(
        name: impl Into<String>,
        reference: impl Into<ModelRef>,
    ) -> Self {
        Self::with_kind(
            name,
            FieldKind::Relation(Relation::OneToOneReverse(Reverse {
                reference: reference.into(),
                reverse_name: None,
            })),
        )
    }

    /// Many-to-many collection backed by a synthesized intermediary model.
    pub fn many_to_many(name: impl Into<String>, reference: impl Into<ModelRef>) -> Self {
        Self::with_kind(
            name,
            FieldKind::Relation(Relation::ManyToMany(ManyToMany {
                reference: reference.into(),
                through: None,
            })),
        )
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn required(mut self, value: bool) -> Self {
        self.required = value;
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub fn indexed(mut self, value: bool) -> Self {
        self.indexed = value;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Require text values to match `pattern`.
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Set the reverse field name of a relation. No effect on other fields.
    pub fn reverse_name(mut self, name: impl Into<String>) -> Self {
        match &mut self.kind {
            FieldKind::Relation(Relation::ManyToOne(fk) | Relation::OneToOne(fk)) => {
                fk.reverse_name = Some(name.into());
            }
            FieldKind::Relation(Relation::OneToMany(r) | Relation::OneToOneReverse(r)) => {
                r.reverse_name = Some(name.into());
            }
            _ => {}
        }
        self
    }

    /// Set the cascade policy of a foreign key. No effect on other fields.
    pub fn on_delete(mut self, action: OnDelete) -> Self {
        if let FieldKind::Relation(Relation::ManyToOne(fk) | Relation::OneToOne(fk)) =
            &mut self.kind
        {
            fk.on_delete = action;
        }
        self
    }

    pub fn relation(&self) -> Option<&Relation> {
        match &self.kind {
            FieldKind::Relation(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn relation_mut(&mut self) -> Option<&mut Relation> {
        match &mut self.kind {
            FieldKind::Relation(r) => Some(r),
            _ => None,
        }
    }

    /// Storage type, `None` when the field is not a column.
    pub fn data_type(&self) -> Option<DataType> {
        match &self.kind {
            FieldKind::Key => Some(DataType::Key),
            FieldKind::Scalar(t) => Some(*t),
            FieldKind::Relation(r) => r.data_type(),
        }
    }

    pub fn is_column(&self) -> bool {
        self.data_type().is_some()
    }

    pub fn is_key(&self) -> bool {
        matches!(self.kind, FieldKind::Key)
    }

    pub fn is_foreign_key(&self) -> bool {
        self.relation().is_some_and(Relation::is_foreign_key)
    }

    /// Check a value against the field's constraints and return it.
    pub fn validate(&self, value: Value) -> Result<Value> {
        let mut errors = ValidationError::new();
        if value.is_empty() {
            if self.required {
                errors.add_required(&self.name);
            }
            errors.into_result().map_err(Error::Validation)?;
            return Ok(value);
        }
        if let (Some(size), Value::Text(text)) = (self.size, &value) {
            let len = text.chars().count();
            if self.data_type() == Some(DataType::String) && len > size as usize {
                errors.add_max_length(&self.name, size as usize, len);
            }
        }
        if let (Some(pattern), Value::Text(text)) = (&self.pattern, &value) {
            if !pattern.is_match(text) {
                errors.add_pattern(&self.name, pattern.as_str());
            }
        }
        if let Some(validator) = &self.validator {
            if let Err(message) = validator(&value) {
                errors.add_custom(&self.name, message);
            }
        }
        errors.into_result().map_err(Error::Validation)?;
        Ok(value)
    }

    /// Storage representation of this field for `record`.
    ///
    /// Foreign keys store the referenced record's key; everything else is
    /// stored as held.
    pub fn to_database_value(&self, record: &Record) -> Value {
        match &self.kind {
            FieldKind::Key => Value::key(record.key()),
            FieldKind::Relation(r) if r.is_foreign_key() => Value::key(record.reference_key(&self.name)),
            FieldKind::Relation(_) => Value::Null,
            FieldKind::Scalar(_) => record.get(&self.name).cloned().unwrap_or(Value::Null),
        }
    }
}
