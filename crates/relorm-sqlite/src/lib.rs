//! SQLite driver for relorm.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate provides a synchronous SQLite driver using FFI bindings to a
//! bundled libsqlite3. It implements the `Connection` and `Driver` traits
//! from relorm-core.
//!
//! - `%s` placeholders are rewritten to `?` before preparing
//! - Foreign keys are enforced (`PRAGMA foreign_keys = ON`) so the
//!   `ON DELETE` clauses of generated tables take effect
//! - Every statement is fully stepped and its rows buffered into the
//!   returned `Cursor`
//!
//! # Example
//!
//! ```rust,ignore
//! use relorm_core::{Connection, Value};
//! use relorm_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute("CREATE TABLE \"users\" (\"key\" INTEGER PRIMARY KEY, \"name\" TEXT)", &[])?;
//! let cursor = conn.execute("INSERT INTO \"users\" (\"name\") VALUES (%s)", &[Value::from("Alice")])?;
//! assert_eq!(cursor.lastrowid(), Some(1));
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text`, `Decimal` | TEXT |
//! | `Bytes` | BLOB |
//! | `Json`, `Array` | TEXT (JSON) |
//! | `Null` | NULL |

pub mod connection;
pub mod ffi;
pub mod placeholder;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection, SqliteDriver};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
