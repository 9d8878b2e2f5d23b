//! Schema registry.
//!
//! Loading happens in two phases. Models are first declared into a
//! [`Registry`], in any order and with relation fields naming models that
//! may not exist yet. [`Registry::prepare`] then resolves every relation and
//! returns an immutable [`Schema`]; runtime code only ever sees the schema.

#![allow(clippy::result_large_err)]

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result, SchemaError, SchemaErrorKind};
use crate::field::Field;
use crate::model::Model;
use crate::relation::{self, ModelName, ModelRef, Relation};

fn index_key(name: &ModelName) -> (String, String) {
    (name.package.clone(), name.name.to_lowercase())
}

/// Mutable registry used while models are being declared.
#[derive(Debug, Default)]
pub struct Registry {
    models: Vec<Model>,
    index: HashMap<(String, String), usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Names are unique per package, ignoring case.
    pub fn register(&mut self, model: Model) -> Result<()> {
        let key = index_key(model.model_name());
        if self.index.contains_key(&key) {
            return Err(Error::Schema(SchemaError {
                kind: SchemaErrorKind::DuplicateModel,
                message: format!("model {} is already registered", model.model_name()),
            }));
        }
        tracing::trace!(model = %model.model_name(), table = model.table(), "registered model");
        self.index.insert(key, self.models.len());
        self.models.push(model);
        Ok(())
    }

    /// Look up a declared model.
    pub fn get_model(&self, name: &str, package: &str) -> Result<&Model> {
        let name = ModelName::new(package, name);
        self.index_of(&name)
            .map(|i| &self.models[i])
            .ok_or_else(|| Error::model_not_found(&name))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub(crate) fn index_of(&self, name: &ModelName) -> Option<usize> {
        self.index.get(&index_key(name)).copied()
    }

    pub(crate) fn model_at(&self, index: usize) -> &Model {
        &self.models[index]
    }

    pub(crate) fn model_at_mut(&mut self, index: usize) -> &mut Model {
        &mut self.models[index]
    }

    /// Run the prepare pass and freeze the registry into a [`Schema`].
    ///
    /// The relation fields to prepare are snapshotted up front, in
    /// registration then declaration order. Reverse fields and intermediary
    /// models created along the way are not prepared themselves. Any error
    /// aborts the whole load.
    #[tracing::instrument(level = "debug", skip(self), fields(models = self.models.len()))]
    pub fn prepare(mut self) -> Result<Schema> {
        let pending: Vec<(usize, String)> = self
            .models
            .iter()
            .enumerate()
            .flat_map(|(i, model)| {
                model
                    .fields()
                    .iter()
                    .filter(|f| f.relation().is_some())
                    .map(move |f| (i, f.name.clone()))
            })
            .collect();

        for (owner, field) in &pending {
            relation::prepare_field(&mut self, *owner, field)?;
        }

        tracing::debug!(
            models = self.models.len(),
            relations = pending.len(),
            "prepared schema"
        );
        Ok(Schema {
            models: self.models.into_iter().map(Arc::new).collect(),
            index: self.index,
        })
    }
}

/// Read-only registry produced by [`Registry::prepare`].
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: Vec<Arc<Model>>,
    index: HashMap<(String, String), usize>,
}

impl Schema {
    /// Look up a model by name scoped to a package.
    pub fn get_model(&self, name: &str, package: &str) -> Result<Arc<Model>> {
        self.get(&ModelName::new(package, name))
    }

    pub fn get(&self, name: &ModelName) -> Result<Arc<Model>> {
        self.index
            .get(&index_key(name))
            .map(|i| Arc::clone(&self.models[*i]))
            .ok_or_else(|| Error::model_not_found(name))
    }

    /// Resolve a by-name reference made from a model in `owner_package`.
    pub fn resolve(&self, reference: &ModelRef, owner_package: &str) -> Result<Arc<Model>> {
        self.get(&reference.resolve(owner_package))
    }

    /// Models in registration order; intermediary models follow all
    /// declared ones.
    pub fn models(&self) -> &[Arc<Model>] {
        &self.models
    }

    /// Resolve the model referenced by relation field `field` of `model`.
    pub fn reference_of(&self, model: &Model, field: &str) -> Result<Arc<Model>> {
        let relation = relation_of(model, field)?;
        self.resolve(relation.reference(), model.package())
    }

    /// Resolve the reverse field of relation field `field` of `model`, on the
    /// referenced model.
    pub fn reverse_field_of(&self, model: &Model, field: &str) -> Result<(Arc<Model>, Field)> {
        let relation = relation_of(model, field)?;
        let reference = self.resolve(relation.reference(), model.package())?;
        let reverse_name = relation
            .reverse_name()
            .ok_or_else(|| Error::field_not_found(reference.name(), "<reverse>"))?;
        let reverse = reference.require_field(reverse_name)?.clone();
        Ok((reference, reverse))
    }

    /// Intermediary model backing many-to-many field `field` of `model`.
    pub fn intermediary_of(&self, model: &Model, field: &str) -> Result<Arc<Model>> {
        match relation_of(model, field)? {
            Relation::ManyToMany(m) => {
                let through = m.through.as_ref().ok_or_else(|| {
                    Error::Schema(SchemaError {
                        kind: SchemaErrorKind::Invalid,
                        message: format!("{}.{} has not been prepared", model.name(), field),
                    })
                })?;
                self.get(through)
            }
            other => Err(Error::Schema(SchemaError {
                kind: SchemaErrorKind::Invalid,
                message: format!(
                    "{}.{} is a {}, not a ManyToMany",
                    model.name(),
                    field,
                    other.kind_name()
                ),
            })),
        }
    }
}

fn relation_of<'m>(model: &'m Model, field: &str) -> Result<&'m Relation> {
    model.require_field(field)?.relation().ok_or_else(|| {
        Error::Schema(SchemaError {
            kind: SchemaErrorKind::Invalid,
            message: format!("{}.{} is not a relation field", model.name(), field),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;
    use crate::relation::OnDelete;
    use crate::types::DataType;

    fn contact() -> Model {
        Model::builder("Contact")
            .package("hello")
            .field(Field::string("name").required(true))
            .build()
            .unwrap()
    }

    #[test]
    fn many_to_one_creates_one_to_many_reverse() {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("Address")
                    .package("hello")
                    .field(Field::string("city"))
                    .field(Field::many_to_one("contact", "Contact"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.register(contact()).unwrap();
        let schema = registry.prepare().unwrap();

        let contact = schema.get_model("Contact", "hello").unwrap();
        let reverse = contact.field("address_set").expect("reverse field");
        let Some(Relation::OneToMany(r)) = reverse.relation() else {
            panic!("expected OneToMany, got {:?}", reverse.kind);
        };
        assert_eq!(r.reverse_name.as_deref(), Some("contact"));
        assert_eq!(r.reference.resolve("hello"), ModelName::new("hello", "Address"));
        assert_eq!(
            contact
                .fields()
                .iter()
                .filter(|f| matches!(f.relation(), Some(Relation::OneToMany(_))))
                .count(),
            1
        );

        let address = schema.get_model("address", "hello").unwrap();
        let (model, field) = schema.reverse_field_of(&address, "contact").unwrap();
        assert_eq!(model.name(), "Contact");
        assert_eq!(field.name, "address_set");
    }

    #[test]
    fn existing_consistent_reverse_is_reused() {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("Contact")
                    .field(Field::one_to_many("addresses", "Address").reverse_name("owner"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                Model::builder("Address")
                    .field(Field::many_to_one("owner", "Contact").reverse_name("addresses"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let schema = registry.prepare().unwrap();

        let contact = schema.get_model("Contact", "").unwrap();
        let address = schema.get_model("Address", "").unwrap();
        assert_eq!(contact.fields().len(), 2);
        assert_eq!(address.fields().len(), 2);
    }

    #[test]
    fn one_to_many_creates_many_to_one_column() {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("Blog")
                    .field(Field::one_to_many("entries", "Entry"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(Model::builder("Entry").build().unwrap())
            .unwrap();
        let schema = registry.prepare().unwrap();

        let entry = schema.get_model("Entry", "").unwrap();
        let blog_fk = entry.field("blog").expect("reverse many-to-one");
        assert_eq!(blog_fk.data_type(), Some(DataType::Reference));
        assert_eq!(
            blog_fk.relation().and_then(Relation::reverse_name),
            Some("entries")
        );
    }

    #[test]
    fn conflicting_reverse_name_is_duplicate_field() {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("Contact")
                    .field(Field::string("address_set"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                Model::builder("Address")
                    .field(Field::many_to_one("contact", "Contact"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let err = registry.prepare().unwrap_err();
        assert!(matches!(err, Error::DuplicateField(ref d) if d.field == "address_set"));
    }

    #[test]
    fn two_foreign_keys_with_same_reverse_name_conflict() {
        let mut registry = Registry::new();
        registry
            .register(Model::builder("User").build().unwrap())
            .unwrap();
        registry
            .register(
                Model::builder("Message")
                    .field(Field::many_to_one("sender", "User").reverse_name("messages"))
                    .field(Field::many_to_one("recipient", "User").reverse_name("messages"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let err = registry.prepare().unwrap_err();
        assert!(matches!(err, Error::DuplicateField(ref d) if d.model == "User"));
    }

    #[test]
    fn one_to_one_creates_restricted_reverse() {
        let mut registry = Registry::new();
        registry
            .register(Model::builder("User").build().unwrap())
            .unwrap();
        registry
            .register(
                Model::builder("Profile")
                    .field(Field::one_to_one("user", "User").on_delete(OnDelete::Cascade))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let schema = registry.prepare().unwrap();
        let user = schema.get_model("User", "").unwrap();
        let reverse = user.field("profile").expect("reverse one-to-one");
        assert!(matches!(
            reverse.relation(),
            Some(Relation::OneToOneReverse(r)) if r.reverse_name.as_deref() == Some("user")
        ));
        assert!(!reverse.is_column());
    }

    #[test]
    fn many_to_many_synthesizes_intermediary() {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("Contact")
                    .package("hello")
                    .field(Field::many_to_many("groups", "Group"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(Model::builder("Group").package("hello").build().unwrap())
            .unwrap();
        let schema = registry.prepare().unwrap();

        let contact = schema.get_model("Contact", "hello").unwrap();
        let through = schema.intermediary_of(&contact, "groups").unwrap();
        assert_eq!(through.name(), "contact_groups");
        assert_eq!(through.package(), "hello");
        assert_eq!(through.table(), "hello_contact_groups");
        let intermediary = through.intermediary().expect("intermediary marker");
        assert_eq!(intermediary.reference, ModelName::new("hello", "Group"));

        let source = through.field("source").unwrap();
        let target = through.field("target").unwrap();
        assert!(source.is_foreign_key() && target.is_foreign_key());
        assert_eq!(
            schema.reference_of(&through, "target").unwrap().name(),
            "Group"
        );
        // no reverse fields for the intermediary's own keys
        let group = schema.get_model("Group", "hello").unwrap();
        assert_eq!(group.fields().len(), 1);
        assert_eq!(schema.models().last().unwrap().name(), "contact_groups");
    }

    #[test]
    fn unknown_reference_aborts_prepare() {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("Address")
                    .field(Field::many_to_one("contact", "Contact"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let err = registry.prepare().unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref s) if s.kind == SchemaErrorKind::ModelNotFound
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = Registry::new();
        registry.register(contact()).unwrap();
        let err = registry.register(contact()).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref s) if s.kind == SchemaErrorKind::DuplicateModel
        ));
        assert!(registry.get_model("contact", "hello").is_ok());
        assert!(registry.get_model("Contact", "other").is_err());
    }

    #[test]
    fn scalar_fields_survive_prepare_untouched() {
        let mut registry = Registry::new();
        registry.register(contact()).unwrap();
        let schema = registry.prepare().unwrap();
        let contact = schema.get_model("Contact", "hello").unwrap();
        assert!(matches!(
            contact.field("name").unwrap().kind,
            FieldKind::Scalar(DataType::String)
        ));
    }
}
