//! Storage type descriptors.

use std::fmt;

/// Storage type of a persisted field.
///
/// Dialect-specific column types are chosen by the DDL generator; this enum
/// only says what kind of data the column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Auto-incrementing integer primary key
    Key,
    /// Bounded string, sized by the field's `size`
    String,
    /// Unbounded text
    Text,
    Integer,
    Float,
    /// Fixed precision number
    Decimal,
    Boolean,
    DateTime,
    Date,
    Time,
    Binary,
    /// Integer surrogate key of another model
    Reference,
}

impl DataType {
    /// Get the lowercase descriptor name, as used in type maps.
    pub const fn as_str(self) -> &'static str {
        match self {
            DataType::Key => "key",
            DataType::String => "string",
            DataType::Text => "text",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Decimal => "decimal",
            DataType::Boolean => "boolean",
            DataType::DateTime => "datetime",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Binary => "binary",
            DataType::Reference => "reference",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
