//! Table creation order.

use std::sync::Arc;

use relorm_core::{Model, Relation, Schema};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Models of `schema` ordered so referenced tables come before the tables
/// referencing them.
///
/// Self references are ignored and a reference cycle is broken at the edge
/// that closes it, leaving the rest of the cycle in registration order.
pub fn create_order(schema: &Schema) -> Vec<Arc<Model>> {
    let models = schema.models();
    let mut marks = vec![Mark::Unvisited; models.len()];
    let mut ordered = Vec::with_capacity(models.len());
    for index in 0..models.len() {
        visit(schema, index, &mut marks, &mut ordered);
    }
    tracing::trace!(tables = ordered.len(), "computed table creation order");
    ordered
}

fn visit(schema: &Schema, index: usize, marks: &mut [Mark], ordered: &mut Vec<Arc<Model>>) {
    if marks[index] != Mark::Unvisited {
        return;
    }
    marks[index] = Mark::Visiting;
    let model = &schema.models()[index];
    for dependency in dependencies(schema, model) {
        visit(schema, dependency, marks, ordered);
    }
    marks[index] = Mark::Done;
    ordered.push(Arc::clone(model));
}

fn dependencies(schema: &Schema, model: &Model) -> Vec<usize> {
    model
        .fields()
        .iter()
        .filter_map(|field| match field.relation() {
            Some(Relation::ManyToOne(fk) | Relation::OneToOne(fk)) => {
                let target = fk.reference.resolve(model.package());
                schema
                    .models()
                    .iter()
                    .position(|m| m.is(&target) && !m.is(model.model_name()))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relorm_core::{Field, Registry};

    fn names(models: &[Arc<Model>]) -> Vec<&str> {
        models.iter().map(|m| m.name()).collect()
    }

    #[test]
    fn referenced_tables_come_first() {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("Comment")
                    .field(Field::many_to_one("article", "Article"))
                    .field(Field::many_to_one("parent", "Comment"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                Model::builder("Article")
                    .field(Field::many_to_one("author", "Author"))
                    .field(Field::many_to_many("tags", "Tag"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.register(Model::builder("Author").build().unwrap()).unwrap();
        registry.register(Model::builder("Tag").build().unwrap()).unwrap();
        let schema = registry.prepare().unwrap();

        let order = create_order(&schema);
        let order = names(&order);
        assert_eq!(order.len(), 5);
        let at = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(at("Author") < at("Article"));
        assert!(at("Article") < at("Comment"));
        assert!(at("Tag") < at("article_tags"));
        assert!(at("Article") < at("article_tags"));
    }

    #[test]
    fn cycles_keep_every_model_once() {
        let mut registry = Registry::new();
        registry
            .register(
                Model::builder("A")
                    .field(Field::many_to_one("b", "B").reverse_name("a_refs"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                Model::builder("B")
                    .field(Field::many_to_one("a", "A").reverse_name("b_refs"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let schema = registry.prepare().unwrap();
        assert_eq!(names(&create_order(&schema)), vec!["B", "A"]);
    }
}
