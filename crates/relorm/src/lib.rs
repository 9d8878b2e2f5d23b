//! relorm - relationship-aware object-relational mapping.
//!
//! Models are described at runtime with [`Model::builder`] and [`Field`]
//! constructors, registered in a [`Registry`], and frozen into a [`Schema`]
//! by [`Registry::prepare`]. Preparing synthesizes the reverse side of every
//! relation and an intermediary model for each many-to-many field.
//!
//! A [`Database`] binds a schema to a storage [`Driver`] and provides:
//!
//! - DDL: `create_table`, `drop_table`, `alter_table`, `create_all`
//! - Persistence: `insert_record`, `update_record`, `delete_record`
//! - Queries: [`QuerySet`] with filter strings such as `name == :name`
//! - Relation access: [`O2MSet`] and [`M2MSet`] collection proxies
//! - Transactions: `run_in_transaction`
//!
//! # Example
//!
//! ```
//! use relorm::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry
//!     .register(
//!         Model::builder("Author")
//!             .field(Field::string("name").required(true))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//! registry
//!     .register(
//!         Model::builder("Book")
//!             .field(Field::string("title"))
//!             .field(Field::many_to_one("author", "Author"))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//! let schema = registry.prepare().unwrap();
//!
//! let db = Database::new(SqliteDriver::new(), DatabaseConfig::memory(), schema);
//! db.create_all().unwrap();
//!
//! let author_model = db.model("Author", "").unwrap();
//! let mut author = db.new_record(&author_model);
//! author.set("name", "Ursula").unwrap();
//! db.save(&mut author).unwrap();
//!
//! let books = db.one_to_many(&author, "book_set").unwrap();
//! let mut book = db.new_record(books.reference());
//! book.set("title", "The Dispossessed").unwrap();
//! books.add(std::slice::from_mut(&mut book)).unwrap();
//! assert_eq!(books.all().unwrap().count().unwrap(), 1);
//! ```

pub mod collection;
pub mod database;
pub mod query;
mod transaction;

pub use collection::{CLEAR_BATCH_SIZE, M2MSet, O2MSet};
pub use database::Database;
pub use query::{KEY_BATCH_SIZE, QuerySet};

pub use relorm_core::{
    ColumnInfo, Connection, Cursor, DataType, DatabaseConfig, Dialect, Driver, Engine, Error,
    Field, FieldKind, ForeignKey, FromValue, Intermediary, KEY_FIELD, ManyToMany, Model,
    ModelBuilder, ModelName, ModelRef, OnDelete, Record, Registry, Relation, Result, Reverse, Row,
    Schema, Value, error,
};
pub use relorm_query::{Params, Query, params};
pub use relorm_schema::{DdlGenerator, create_order, generator_for_dialect};

#[cfg(feature = "sqlite")]
pub use relorm_sqlite::{SqliteConfig, SqliteConnection, SqliteDriver};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Database, DatabaseConfig, Driver, Error, Field, M2MSet, Model, O2MSet, OnDelete, QuerySet,
        Record, Registry, Result, Schema, Value, params,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteDriver;
}
