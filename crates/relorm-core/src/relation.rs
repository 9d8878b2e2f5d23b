//! Relationship descriptors and the prepare pass that binds them.
//!
//! Relation fields are declared with a by-name [`ModelRef`] because the
//! referenced model may not be registered yet. Once every model of a loading
//! unit is in the [`Registry`](crate::Registry), `prepare` walks the relation
//! fields in declaration order and:
//!
//! - creates the reverse field on the referenced model (`OneToMany` for
//!   `ManyToOne`, `ManyToOne` for `OneToMany`, a restricted one-to-one
//!   reverse for `OneToOne`), or accepts an existing field that already
//!   points back at the owner;
//! - synthesizes the intermediary model backing a `ManyToMany` field.
//!
//! A reverse name that is already taken by an unrelated field is a
//! [`DuplicateFieldError`], and aborts the whole load.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DuplicateFieldError, Error, Result};
use crate::field::Field;
use crate::model::{Intermediary, Model};
use crate::registry::Registry;
use crate::types::DataType;

/// What happens to referencing rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OnDelete {
    /// Clear the reference.
    #[default]
    SetNull,
    /// Refuse to delete while references exist.
    Restrict,
    /// Delete the referencing rows too.
    Cascade,
}

impl OnDelete {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::SetNull => "SET NULL",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
        }
    }
}

/// Registry key of a model: package plus model name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelName {
    pub package: String,
    pub name: String,
}

impl ModelName {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }

    /// Check whether this is the same model, ignoring the case of the name.
    pub fn same(&self, other: &ModelName) -> bool {
        self.package == other.package && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.package.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.package, self.name)
        }
    }
}

/// Unresolved reference to a model by name.
///
/// Without an explicit package the reference is looked up in the owner's
/// package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub name: String,
    pub package: Option<String>,
}

impl ModelRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: None,
        }
    }

    pub fn in_package(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: Some(package.into()),
        }
    }

    /// Resolve against the package of the model owning the reference.
    pub fn resolve(&self, owner_package: &str) -> ModelName {
        ModelName::new(
            self.package.as_deref().unwrap_or(owner_package),
            self.name.clone(),
        )
    }
}

/// Parses `"Name"` or `"package.Name"`.
impl From<&str> for ModelRef {
    fn from(value: &str) -> Self {
        match value.rsplit_once('.') {
            Some((package, name)) => ModelRef::in_package(package, name),
            None => ModelRef::new(value),
        }
    }
}

impl From<String> for ModelRef {
    fn from(value: String) -> Self {
        ModelRef::from(value.as_str())
    }
}

impl From<&ModelName> for ModelRef {
    fn from(value: &ModelName) -> Self {
        ModelRef::in_package(value.package.clone(), value.name.clone())
    }
}

/// A to-one reference stored as a foreign key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub reference: ModelRef,
    /// Name of the reverse field on the referenced model.
    pub reverse_name: Option<String>,
    pub on_delete: OnDelete,
}

/// A virtual accessor pointing back at a foreign key on another model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reverse {
    pub reference: ModelRef,
    /// Name of the foreign key field on the referenced model.
    pub reverse_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToMany {
    pub reference: ModelRef,
    /// Intermediary model, set by `prepare`.
    pub through: Option<ModelName>,
}

/// The relationship carried by a relation field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    ManyToOne(ForeignKey),
    /// `ManyToOne` with a unique column and a one-to-one reverse.
    OneToOne(ForeignKey),
    OneToMany(Reverse),
    /// Reverse of a `OneToOne`; only exposes get/set of the single record.
    OneToOneReverse(Reverse),
    ManyToMany(ManyToMany),
}

impl Relation {
    pub fn reference(&self) -> &ModelRef {
        match self {
            Relation::ManyToOne(fk) | Relation::OneToOne(fk) => &fk.reference,
            Relation::OneToMany(r) | Relation::OneToOneReverse(r) => &r.reference,
            Relation::ManyToMany(m) => &m.reference,
        }
    }

    pub fn reverse_name(&self) -> Option<&str> {
        match self {
            Relation::ManyToOne(fk) | Relation::OneToOne(fk) => fk.reverse_name.as_deref(),
            Relation::OneToMany(r) | Relation::OneToOneReverse(r) => r.reverse_name.as_deref(),
            Relation::ManyToMany(_) => None,
        }
    }

    /// Storage type, `None` for relations that are not a column.
    pub const fn data_type(&self) -> Option<DataType> {
        match self {
            Relation::ManyToOne(_) | Relation::OneToOne(_) => Some(DataType::Reference),
            _ => None,
        }
    }

    pub const fn is_foreign_key(&self) -> bool {
        matches!(self, Relation::ManyToOne(_) | Relation::OneToOne(_))
    }

    /// Collection accessors can never be assigned.
    pub const fn is_read_only(&self) -> bool {
        matches!(self, Relation::OneToMany(_) | Relation::ManyToMany(_))
    }

    pub const fn kind_name(&self) -> &'static str {
        match self {
            Relation::ManyToOne(_) => "ManyToOne",
            Relation::OneToOne(_) => "OneToOne",
            Relation::OneToMany(_) => "OneToMany",
            Relation::OneToOneReverse(_) => "OneToOneReverse",
            Relation::ManyToMany(_) => "ManyToMany",
        }
    }

    /// Reverse name in effect when none was given explicitly.
    ///
    /// `owner` is the name of the model declaring the field.
    pub fn default_reverse_name(&self, owner: &str) -> Option<String> {
        let owner = owner.to_lowercase();
        match self {
            Relation::ManyToOne(_) => Some(format!("{owner}_set")),
            Relation::OneToOne(_) | Relation::OneToMany(_) => Some(owner),
            Relation::OneToOneReverse(_) | Relation::ManyToMany(_) => None,
        }
    }

    /// Explicit reverse name, falling back to the default.
    pub fn effective_reverse_name(&self, owner: &str) -> Option<String> {
        self.reverse_name()
            .map(str::to_string)
            .or_else(|| self.default_reverse_name(owner))
    }

    fn set_reverse_name(&mut self, name: String) {
        match self {
            Relation::ManyToOne(fk) | Relation::OneToOne(fk) => fk.reverse_name = Some(name),
            Relation::OneToMany(r) | Relation::OneToOneReverse(r) => r.reverse_name = Some(name),
            Relation::ManyToMany(_) => {}
        }
    }
}

/// Run the prepare step of one relation field.
///
/// `owner` indexes the model declaring `field_name` inside `registry`.
pub(crate) fn prepare_field(registry: &mut Registry, owner: usize, field_name: &str) -> Result<()> {
    let owner_model = registry.model_at(owner);
    let owner_name = owner_model.model_name().clone();
    let Some(relation) = owner_model
        .field(field_name)
        .and_then(Field::relation)
        .cloned()
    else {
        return Ok(());
    };
    let target = relation.reference().resolve(&owner_name.package);
    let target_index = registry
        .index_of(&target)
        .ok_or_else(|| Error::model_not_found(&target))?;
    let target_name = registry.model_at(target_index).model_name().clone();

    tracing::trace!(
        model = %owner_name,
        field = field_name,
        relation = relation.kind_name(),
        reference = %target_name,
        "preparing relation field"
    );

    match &relation {
        Relation::ManyToOne(_) | Relation::OneToOne(_) | Relation::OneToMany(_) => {
            let Some(reverse_name) = relation.effective_reverse_name(&owner_name.name) else {
                return Ok(());
            };
            if let Some(r) = registry
                .model_at_mut(owner)
                .field_mut(field_name)
                .and_then(Field::relation_mut)
            {
                r.set_reverse_name(reverse_name.clone());
            }

            if let Some(existing) = registry.model_at(target_index).field(&reverse_name) {
                let existing_reverse = existing.relation().and_then(|r| {
                    r.effective_reverse_name(&target_name.name)
                        .filter(|_| r.reference().resolve(&target_name.package).same(&owner_name))
                });
                if existing_reverse.as_deref() == Some(field_name) {
                    return Ok(());
                }
                return Err(Error::DuplicateField(DuplicateFieldError {
                    model: target_name.to_string(),
                    field: reverse_name,
                    message: format!(
                        "field already defined in referenced model, cannot add reverse of {}.{}",
                        owner_name, field_name
                    ),
                }));
            }

            let back = ModelRef::from(&owner_name);
            let reverse = match relation {
                Relation::ManyToOne(_) => Field::one_to_many(&reverse_name, back),
                Relation::OneToOne(_) => Field::one_to_one_reverse(&reverse_name, back),
                _ => Field::many_to_one(&reverse_name, back),
            }
            .reverse_name(field_name);
            registry.model_at_mut(target_index).add_field(reverse)?;
            tracing::debug!(
                model = %target_name,
                field = %reverse_name,
                "created reverse lookup field"
            );
            Ok(())
        }
        Relation::ManyToMany(_) => {
            let intermediary = Model::builder(format!(
                "{}_{}",
                owner_name.name.to_lowercase(),
                field_name
            ))
            .package(owner_name.package.clone())
            .field(Field::many_to_one("source", &owner_name).on_delete(OnDelete::Cascade))
            .field(Field::many_to_one("target", &target_name).on_delete(OnDelete::Cascade))
            .intermediary(Intermediary {
                owner: owner_name.clone(),
                field: field_name.to_string(),
                reference: target_name,
            })
            .build()?;
            let through = intermediary.model_name().clone();
            registry.register(intermediary)?;
            if let Some(Relation::ManyToMany(m)) = registry
                .model_at_mut(owner)
                .field_mut(field_name)
                .and_then(Field::relation_mut)
            {
                m.through = Some(through.clone());
            }
            tracing::debug!(
                model = %owner_name,
                field = field_name,
                through = %through,
                "created intermediary model"
            );
            Ok(())
        }
        Relation::OneToOneReverse(_) => Ok(()),
    }
}
