//! Model descriptors.
//!
//! A [`Model`] is a data-driven description of a record type: its registry
//! name, table, ordered fields and unique groups. Models are built with
//! [`Model::builder`], registered in a [`Registry`](crate::Registry) and
//! frozen by the prepare pass.

#![allow(clippy::result_large_err)]

use std::collections::HashSet;

use crate::error::{DuplicateFieldError, Error, Result, SchemaError, SchemaErrorKind};
use crate::field::{Field, KEY_FIELD};
use crate::relation::ModelName;

/// Marks a model synthesized to back a many-to-many field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intermediary {
    /// Model declaring the many-to-many field.
    pub owner: ModelName,
    pub field: String,
    /// Model on the other side of the relation.
    pub reference: ModelName,
}

#[derive(Debug, Clone)]
pub struct Model {
    name: ModelName,
    table: String,
    fields: Vec<Field>,
    unique: Vec<Vec<String>>,
    intermediary: Option<Intermediary>,
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    /// Model name without package.
    pub fn name(&self) -> &str {
        &self.name.name
    }

    pub fn package(&self) -> &str {
        &self.name.package
    }

    pub fn model_name(&self) -> &ModelName {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// All fields in declaration order, the key field first.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field, failing with a schema error when it is missing.
    pub fn require_field(&self, name: &str) -> Result<&Field> {
        self.field(name)
            .ok_or_else(|| Error::field_not_found(&self.name.name, name))
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Fields stored as table columns.
    pub fn columns(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_column())
    }

    pub fn unique_groups(&self) -> &[Vec<String>] {
        &self.unique
    }

    pub fn intermediary(&self) -> Option<&Intermediary> {
        self.intermediary.as_ref()
    }

    pub fn is_intermediary(&self) -> bool {
        self.intermediary.is_some()
    }

    /// Check whether `name` refers to this model.
    pub fn is(&self, name: &ModelName) -> bool {
        self.name.same(name)
    }

    pub(crate) fn add_field(&mut self, field: Field) -> Result<()> {
        if self.field(&field.name).is_some() {
            return Err(Error::DuplicateField(DuplicateFieldError {
                model: self.name.to_string(),
                field: field.name,
                message: "field already defined".to_string(),
            }));
        }
        self.fields.push(field);
        Ok(())
    }
}

/// Table name for a model: `<package>_<name>` lowercased, or the bare
/// lowercase name outside any package.
pub fn table_name(package: &str, name: &str) -> String {
    if package.is_empty() {
        name.to_lowercase()
    } else {
        format!("{}_{}", package, name).to_lowercase()
    }
}

/// Builder for [`Model`].
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    name: String,
    package: String,
    table: Option<String>,
    bases: Vec<Model>,
    fields: Vec<Field>,
    unique: Vec<Vec<String>>,
    intermediary: Option<Intermediary>,
}

impl ModelBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: String::new(),
            table: None,
            bases: Vec::new(),
            fields: Vec::new(),
            unique: Vec::new(),
            intermediary: None,
        }
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    /// Override the derived table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare a multi-column unique constraint.
    pub fn unique(mut self, fields: &[&str]) -> Self {
        self.unique
            .push(fields.iter().map(|f| (*f).to_string()).collect());
        self
    }

    /// Inherit the fields and unique groups of `base`.
    ///
    /// Redefining an inherited field, or inheriting the same field name from
    /// two bases, is a [`DuplicateFieldError`].
    pub fn inherit(mut self, base: &Model) -> Self {
        self.bases.push(base.clone());
        self
    }

    pub(crate) fn intermediary(mut self, intermediary: Intermediary) -> Self {
        self.intermediary = Some(intermediary);
        self
    }

    pub fn build(self) -> Result<Model> {
        let name = ModelName::new(self.package, self.name);
        if name.name.is_empty() {
            return Err(Error::Schema(SchemaError {
                kind: SchemaErrorKind::Invalid,
                message: "model name must not be empty".to_string(),
            }));
        }

        let duplicate = |field: &str, message: String| {
            Error::DuplicateField(DuplicateFieldError {
                model: name.to_string(),
                field: field.to_string(),
                message,
            })
        };

        let mut fields = vec![Field::key()];
        let mut unique = Vec::new();
        let mut inherited_from: Vec<(String, String)> = Vec::new();
        for base in &self.bases {
            for field in base.fields().iter().filter(|f| !f.is_key()) {
                if let Some((_, from)) = inherited_from.iter().find(|(n, _)| *n == field.name) {
                    return Err(duplicate(
                        &field.name,
                        format!("inherited from both {} and {}", from, base.name()),
                    ));
                }
                inherited_from.push((field.name.clone(), base.name().to_string()));
                fields.push(field.clone());
            }
            unique.extend(base.unique_groups().iter().cloned());
        }

        for field in self.fields {
            if field.name.is_empty() {
                return Err(Error::Schema(SchemaError {
                    kind: SchemaErrorKind::Invalid,
                    message: format!("model {name} declares a field without a name"),
                }));
            }
            if field.name == KEY_FIELD {
                return Err(duplicate(KEY_FIELD, "the key field is implicit".to_string()));
            }
            if let Some((_, from)) = inherited_from.iter().find(|(n, _)| *n == field.name) {
                return Err(duplicate(&field.name, format!("inherited from {from}")));
            }
            if fields.iter().any(|f| f.name == field.name) {
                return Err(duplicate(&field.name, "field declared twice".to_string()));
            }
            fields.push(field);
        }

        unique.extend(self.unique);
        let mut seen = HashSet::new();
        unique.retain(|group| seen.insert(group.clone()));
        for group in &unique {
            if let Some(missing) = group
                .iter()
                .find(|f| !fields.iter().any(|field| field.name == **f && field.is_column()))
            {
                return Err(Error::Schema(SchemaError {
                    kind: SchemaErrorKind::Invalid,
                    message: format!("unique group of {name} names unknown column '{missing}'"),
                }));
            }
        }

        let table = self
            .table
            .unwrap_or_else(|| table_name(&name.package, &name.name));
        Ok(Model {
            name,
            table,
            fields,
            unique,
            intermediary: self.intermediary,
        })
    }
}
