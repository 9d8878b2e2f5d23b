//! Database configuration.

#![allow(clippy::result_large_err)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::connection::Dialect;
use crate::error::{ConfigError, Error, Result};

/// Storage engine named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Sqlite,
    Postgres,
}

impl Engine {
    pub const fn dialect(self) -> Dialect {
        match self {
            Engine::Sqlite => Dialect::Sqlite,
            Engine::Postgres => Dialect::Postgres,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            "postgres" | "postgresql" | "psycopg2" => Ok(Engine::Postgres),
            other => Err(Error::Config(ConfigError {
                message: format!("unknown database engine '{other}'"),
                source: None,
            })),
        }
    }
}

/// Connection settings for a database.
///
/// For SQLite `name` is the database file path, `:memory:` for an
/// in-memory database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: Engine,
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::memory()
    }
}

impl DatabaseConfig {
    /// SQLite database stored in `path`.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            engine: Engine::Sqlite,
            name: path.into(),
            host: None,
            port: None,
            user: None,
            password: None,
        }
    }

    /// In-memory SQLite database.
    pub fn memory() -> Self {
        Self::sqlite(":memory:")
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Read `DATABASE_ENGINE`, `DATABASE_NAME`, `DATABASE_HOST`,
    /// `DATABASE_PORT`, `DATABASE_USER` and `DATABASE_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::memory();
        if let Some(engine) = lookup("DATABASE_ENGINE") {
            config.engine = engine.parse()?;
        }
        if let Some(name) = lookup("DATABASE_NAME").filter(|n| !n.is_empty()) {
            config.name = name;
        }
        config.host = lookup("DATABASE_HOST").filter(|v| !v.is_empty());
        config.port = match lookup("DATABASE_PORT").filter(|v| !v.is_empty()) {
            Some(port) => Some(port.parse().map_err(|e| {
                Error::Config(ConfigError {
                    message: format!("invalid DATABASE_PORT '{port}'"),
                    source: Some(Box::new(e)),
                })
            })?),
            None => None,
        };
        config.user = lookup("DATABASE_USER").filter(|v| !v.is_empty());
        config.password = lookup("DATABASE_PASSWORD").filter(|v| !v.is_empty());
        tracing::debug!(engine = %config.engine, name = %config.name, "loaded database configuration");
        Ok(config)
    }
}
