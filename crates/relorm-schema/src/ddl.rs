//! DDL (Data Definition Language) generation from model descriptors.
//!
//! Column lists are derived from every field with a storage type; relation
//! fields without a column (one-to-many, many-to-many, one-to-one reverse)
//! never reach the table. Foreign keys always reference the `key` column of
//! the referenced model's table.

#![allow(clippy::result_large_err)]

use relorm_core::{DataType, Dialect, Field, KEY_FIELD, Model, OnDelete, Relation, Result, Schema};

/// Generates DDL statements for one SQL dialect.
pub trait DdlGenerator {
    fn dialect(&self) -> Dialect;

    /// Column type of `data_type`, with `size` applied where the type takes one.
    fn column_type(&self, data_type: DataType, size: Option<u32>) -> String;

    /// Statement returning one row when the table named by its single
    /// parameter exists.
    fn exists_sql(&self) -> &'static str;

    /// Column definition of `field`, `None` when the field is not a column.
    ///
    /// `"name" TYPE [NOT NULL] [UNIQUE] [REFERENCES "table" ("key") ON DELETE ...]`
    fn field_sql(&self, schema: &Schema, model: &Model, field: &Field) -> Result<Option<String>> {
        let Some(data_type) = field.data_type() else {
            return Ok(None);
        };
        let dialect = self.dialect();
        let mut sql = format!(
            "{} {}",
            dialect.quote_identifier(&field.name),
            self.column_type(data_type, field.size)
        );
        if field.is_key() {
            return Ok(Some(sql));
        }
        if field.required {
            sql.push_str(" NOT NULL");
        }
        if field.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(Relation::ManyToOne(fk) | Relation::OneToOne(fk)) = field.relation() {
            let reference = schema.resolve(&fk.reference, model.package())?;
            sql.push_str(&format!(
                " REFERENCES {} ({}) ON DELETE {}",
                dialect.quote_identifier(reference.table()),
                dialect.quote_identifier(KEY_FIELD),
                on_delete_clause(field, fk.on_delete)
            ));
        }
        Ok(Some(sql))
    }

    /// `CREATE TABLE` statement of `model`, one column per line followed by
    /// the model's unique groups.
    fn create_sql(&self, schema: &Schema, model: &Model) -> Result<String> {
        tracing::debug!(
            dialect = ?self.dialect(),
            table = %model.table(),
            "Generating CREATE TABLE DDL"
        );
        let dialect = self.dialect();
        let mut parts = Vec::new();
        for field in model.fields() {
            if let Some(column) = self.field_sql(schema, model, field)? {
                parts.push(column);
            }
        }
        for group in model.unique_groups() {
            let columns: Vec<String> = group.iter().map(|c| dialect.quote_identifier(c)).collect();
            parts.push(format!("UNIQUE({})", columns.join(", ")));
        }
        let sql = format!(
            "CREATE TABLE {} (\n    {}\n);",
            dialect.quote_identifier(model.table()),
            parts.join(",\n    ")
        );
        tracing::trace!(sql = %sql, "Generated CREATE TABLE statement");
        Ok(sql)
    }

    fn drop_sql(&self, table: &str) -> String {
        tracing::debug!(table = %table, "Generating DROP TABLE DDL");
        format!("DROP TABLE {};", self.dialect().quote_identifier(table))
    }

    fn rename_sql(&self, from: &str, to: &str) -> String {
        tracing::debug!(from = %from, to = %to, "Generating RENAME TABLE DDL");
        let dialect = self.dialect();
        format!(
            "ALTER TABLE {} RENAME TO {};",
            dialect.quote_identifier(from),
            dialect.quote_identifier(to)
        )
    }
}

/// Create a DDL generator for the given dialect.
pub fn generator_for_dialect(dialect: Dialect) -> Box<dyn DdlGenerator> {
    match dialect {
        Dialect::Sqlite => Box::new(SqliteDdlGenerator),
        Dialect::Postgres => Box::new(PostgresDdlGenerator),
    }
}

/// Trailing `ON DELETE` action of a foreign key column.
///
/// A required column can never be cleared, so anything short of a cascade
/// restricts the delete.
fn on_delete_clause(field: &Field, on_delete: OnDelete) -> &'static str {
    match on_delete {
        OnDelete::Cascade => OnDelete::Cascade.as_sql(),
        _ if field.required => OnDelete::Restrict.as_sql(),
        other => other.as_sql(),
    }
}

fn sized(name: &str, size: Option<u32>, unsized_name: &str) -> String {
    match size {
        Some(size) => format!("{name}({size})"),
        None => unsized_name.to_string(),
    }
}

/// DDL generator for SQLite.
pub struct SqliteDdlGenerator;

impl DdlGenerator for SqliteDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn column_type(&self, data_type: DataType, size: Option<u32>) -> String {
        match data_type {
            DataType::Key => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            DataType::String => sized("VARCHAR", size, "VARCHAR"),
            DataType::Text => sized("VARCHAR", size, "TEXT"),
            DataType::Integer | DataType::Reference => "INTEGER".to_string(),
            DataType::Float => "FLOAT".to_string(),
            DataType::Decimal => "DECIMAL".to_string(),
            DataType::Boolean => "BOOL".to_string(),
            DataType::DateTime => "DATETIME".to_string(),
            DataType::Date => "DATE".to_string(),
            DataType::Time => "TIME".to_string(),
            DataType::Binary => "BLOB".to_string(),
        }
    }

    fn exists_sql(&self) -> &'static str {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = %s"
    }
}

/// DDL generator for PostgreSQL.
pub struct PostgresDdlGenerator;

impl DdlGenerator for PostgresDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn column_type(&self, data_type: DataType, size: Option<u32>) -> String {
        match data_type {
            DataType::Key => "SERIAL PRIMARY KEY".to_string(),
            DataType::String => sized("VARCHAR", size, "TEXT"),
            DataType::Text => "TEXT".to_string(),
            DataType::Integer | DataType::Reference => "INTEGER".to_string(),
            DataType::Float => "FLOAT".to_string(),
            DataType::Decimal => "DECIMAL".to_string(),
            DataType::Boolean => "BOOL".to_string(),
            DataType::DateTime => "TIMESTAMP".to_string(),
            DataType::Date => "DATE".to_string(),
            DataType::Time => "TIME".to_string(),
            DataType::Binary => "BYTEA".to_string(),
        }
    }

    fn exists_sql(&self) -> &'static str {
        "SELECT relname FROM pg_class WHERE relkind = 'r' AND relname = %s"
    }
}
