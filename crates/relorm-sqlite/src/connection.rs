//! SQLite connection implementation.
//!
//! This module provides safe wrappers around SQLite's C API and implements
//! the `Connection` and `Driver` traits from relorm-core.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::result_large_err)] // Error type is defined in relorm-core
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relorm_core::error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind};
use relorm_core::{
    ColumnInfo, Connection, Cursor, DatabaseConfig, Dialect, Driver, Engine, Error, Result, Row,
    Value,
};

use crate::ffi;
use crate::placeholder;
use crate::types;

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Turn on foreign key enforcement after opening.
    pub foreign_keys: bool,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = if self.read_only {
            ffi::SQLITE_OPEN_READONLY
        } else {
            ffi::SQLITE_OPEN_READWRITE
        };
        if self.create && !self.read_only {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::file(":memory:")
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

struct SqliteInner {
    /// Null once the connection is closed.
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is only touched while holding the Mutex around it.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

/// Prepared statement finalized on drop.
struct Statement(*mut ffi::sqlite3_stmt);

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: the statement came from a successful sqlite3_prepare_v2
        unsafe {
            ffi::sqlite3_finalize(self.0);
        }
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid, errmsg returns a valid C string
                unsafe {
                    let msg = error_message(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database {}: {}", config.path, msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        let conn = Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        };
        if config.foreign_keys {
            conn.execute("PRAGMA foreign_keys = ON", &[])?;
        }
        tracing::debug!(path = %conn.path, "opened sqlite database");
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, inner: &SqliteInner, sql: &str, params: &[Value]) -> Result<Cursor> {
        let db = open_handle(inner)?;
        let (native, expected) = placeholder::translate(sql);
        if expected != params.len() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                message: format!(
                    "statement has {expected} placeholders but {} values were given",
                    params.len()
                ),
                source: None,
            }));
        }
        tracing::trace!(sql = %sql, params = params.len(), "executing statement");

        let stmt = prepare_stmt(db, &native, sql)?;
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(stmt.0, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                return Err(bind_error(db, sql, i + 1));
            }
        }

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.0) };
        if col_count == 0 {
            // SAFETY: stmt is valid
            let rc = unsafe { ffi::sqlite3_step(stmt.0) };
            if rc != ffi::SQLITE_DONE && rc != ffi::SQLITE_ROW {
                return Err(step_error(db, sql));
            }
            // SAFETY: db is valid
            let changes = unsafe { ffi::sqlite3_changes(db) };
            let lastrowid = if is_insert(sql) {
                // SAFETY: db is valid
                Some(unsafe { ffi::sqlite3_last_insert_rowid(db) })
            } else {
                None
            };
            return Ok(Cursor::with_changes(
                u64::try_from(changes).unwrap_or_default(),
                lastrowid,
            ));
        }

        let mut col_names = Vec::with_capacity(col_count as usize);
        for i in 0..col_count {
            // SAFETY: stmt is valid, i is in range
            let name = unsafe { types::column_name(stmt.0, i) }.unwrap_or_else(|| format!("col{i}"));
            col_names.push(name);
        }
        let columns = Arc::new(ColumnInfo::new(col_names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.0) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.0, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(db, sql)),
            }
        }
        Ok(Cursor::with_rows(columns, rows))
    }

    fn run_plain(&self, sql: &str) -> Result<()> {
        let inner = self.lock();
        self.run(&inner, sql, &[])?;
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<Cursor> {
        let inner = self.lock();
        self.run(&inner, sql, params)
    }

    fn begin(&self) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                message: "Already in a transaction".to_string(),
                source: None,
            }));
        }
        self.run_plain("BEGIN")?;
        self.lock().in_transaction = true;
        tracing::debug!(path = %self.path, "BEGIN");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        self.run_plain("COMMIT")?;
        self.lock().in_transaction = false;
        tracing::debug!(path = %self.path, "COMMIT");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        let result = self.run_plain("ROLLBACK");
        self.lock().in_transaction = false;
        tracing::debug!(path = %self.path, "ROLLBACK");
        result
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and no statement outlives `run`
            unsafe {
                ffi::sqlite3_close_v2(inner.db);
            }
            inner.db = ptr::null_mut();
            inner.in_transaction = false;
            tracing::debug!(path = %self.path, "closed sqlite database");
        }
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !inner.db.is_null() {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_close_v2(inner.db);
            }
        }
    }
}

/// Opens [`SqliteConnection`]s from a [`DatabaseConfig`].
///
/// `DatabaseConfig::name` is the database path; host and credentials are
/// ignored.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    template: SqliteConfig,
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self {
            template: SqliteConfig::memory(),
        }
    }

    /// Use `config` for everything but the path.
    pub fn with_config(config: SqliteConfig) -> Self {
        Self { template: config }
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    fn connect(&self, config: &DatabaseConfig) -> Result<SqliteConnection> {
        if config.engine != Engine::Sqlite {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::UnsupportedEngine,
                message: format!("the sqlite driver cannot open a {} database", config.engine),
                source: None,
            }));
        }
        let mut sqlite = self.template.clone();
        sqlite.path.clone_from(&config.name);
        SqliteConnection::open(&sqlite)
    }
}

// Helper functions

fn open_handle(inner: &SqliteInner) -> Result<*mut ffi::sqlite3> {
    if inner.db.is_null() {
        return Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Closed,
            message: "connection is closed".to_string(),
            source: None,
        }));
    }
    Ok(inner.db)
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"))
}

/// # Safety
/// `db` must be a valid connection handle.
unsafe fn error_message(db: *mut ffi::sqlite3) -> String {
    // SAFETY: guaranteed by the caller
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn prepare_stmt(db: *mut ffi::sqlite3, native: &str, sql: &str) -> Result<Statement> {
    let c_sql = CString::new(native).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            message: "SQL contains null byte".to_string(),
            source: None,
        })
    })?;

    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_sql.as_bytes().len() as c_int,
            &mut stmt,
            ptr::null_mut(),
        )
    };

    if rc != ffi::SQLITE_OK || stmt.is_null() {
        if !stmt.is_null() {
            drop(Statement(stmt));
        }
        if rc == ffi::SQLITE_OK {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                message: "empty statement".to_string(),
                source: None,
            }));
        }
        return Err(step_error(db, sql));
    }

    Ok(Statement(stmt))
}

fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize) -> Error {
    // SAFETY: db is valid
    let msg = unsafe { error_message(db) };
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: Some(sql.to_string()),
        message: format!("Failed to bind parameter {param_index}: {msg}"),
        source: None,
    })
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe { (error_message(db), ffi::sqlite3_errcode(db)) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message: msg,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    // extended codes carry the primary code in the low byte
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}
