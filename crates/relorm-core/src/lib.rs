//! Core types for relorm.
//!
//! This crate provides the data-driven model layer that the rest of the
//! workspace builds on:
//!
//! - `Value`/`Row` for dynamically typed storage values
//! - `Field` and `Model` descriptors, built at runtime
//! - `Relation` variants and the two-phase `Registry` -> `Schema` load
//! - `Record` instances and the `Connection`/`Driver` storage boundary

pub mod config;
pub mod connection;
pub mod error;
pub mod field;
pub mod model;
pub mod record;
pub mod registry;
pub mod relation;
pub mod row;
pub mod types;
pub mod value;

pub use config::{DatabaseConfig, Engine};
pub use connection::{Connection, Cursor, Dialect, Driver};
pub use error::{Error, FieldValidationError, Result, ValidationError, ValidationErrorKind};
pub use field::{Field, FieldKind, KEY_FIELD, Validator};
pub use model::{Intermediary, Model, ModelBuilder};
pub use record::Record;
pub use registry::{Registry, Schema};
pub use relation::{ForeignKey, ManyToMany, ModelName, ModelRef, OnDelete, Relation, Reverse};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::DataType;
pub use value::Value;
