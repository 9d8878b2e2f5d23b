//! DDL generation for relorm.
//!
//! This crate provides:
//! - Per-dialect column types for field descriptors
//! - Column and CREATE TABLE statements, including foreign key clauses
//!   driven by each reference's cascade policy
//! - DROP/RENAME/table-existence statements
//! - A dependency order for creating every table of a schema

pub mod ddl;
pub mod order;

pub use ddl::{DdlGenerator, PostgresDdlGenerator, SqliteDdlGenerator, generator_for_dialect};
pub use order::create_order;
