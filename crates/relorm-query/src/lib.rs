//! Query construction for relorm.
//!
//! `relorm-query` turns filter strings and model metadata into SQL text plus
//! positional bindings:
//!
//! - **Filter parser**: `name = :name and age >= :age` style predicates.
//! - **Query**: SELECT and count statements over one table.
//! - **DML**: INSERT/UPDATE/DELETE statement text.
//!
//! All statements use `%s` placeholders and double-quoted identifiers.
//! Execution goes through the `Connection` trait from `relorm-core`.

pub mod builder;
pub mod parser;
pub mod select;

pub use builder::{delete_sql, insert_sql, update_sql};
pub use parser::{Conjunction, Filter, Operator, Params, Predicate, Term, parse};
pub use select::{OrderBy, OrderDirection, Query};

#[doc(hidden)]
pub use relorm_core::Value as __Value;

/// Build a [`Params`] map for a filter.
///
/// # Example
///
/// ```
/// use relorm_query::params;
///
/// let p = params! { "name" => "Ada", "age" => 36 };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::Params::new();
        $(
            params.insert(
                ::std::string::String::from($name),
                $crate::__Value::from($value),
            );
        )+
        params
    }};
}
