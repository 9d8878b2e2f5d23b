//! Filter string parser.
//!
//! Filters are written as simple predicates over named parameters, joined by
//! `and`/`or`:
//!
//! ```text
//! name = :name and age >= :age
//! target in :keys
//! ```
//!
//! Literal values are never inlined; every value comes from the parameter
//! map and is bound positionally. `==` is exact equality while `=` is a
//! case-insensitive `LIKE` match.

#![allow(clippy::result_large_err)]

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use relorm_core::error::QueryError;
use relorm_core::{Dialect, Error, Result, Value};

/// Named bind parameters of a filter.
pub type Params = BTreeMap<String, Value>;

fn statement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\w+)\s+(>=|<=|==|!=|<>|>|<|=|not\s+in|in)\s+:(\w+)\s*$")
            .expect("statement pattern is a valid regex")
    })
}

fn split_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\s+(and|or)\s+").expect("split pattern is a valid regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    /// `=`: case-insensitive pattern match
    Like,
    In,
    NotIn,
}

impl Operator {
    fn parse(op: &str) -> Option<Self> {
        let op = op.to_lowercase();
        let op = op.split_whitespace().collect::<Vec<_>>().join(" ");
        match op.as_str() {
            "==" => Some(Operator::Eq),
            "!=" | "<>" => Some(Operator::Ne),
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            ">=" => Some(Operator::Ge),
            "<=" => Some(Operator::Le),
            "=" => Some(Operator::Like),
            "in" => Some(Operator::In),
            "not in" => Some(Operator::NotIn),
            _ => None,
        }
    }

    const fn takes_list(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

/// One parsed comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: Operator,
    /// Number of values bound by this predicate.
    pub arity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Predicate(Predicate),
    Conjunction(Conjunction),
}

/// A parsed filter string with its bindings in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub terms: Vec<Term>,
    pub bindings: Vec<Value>,
}

impl Filter {
    /// Render the filter with `%s` placeholders.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.terms
            .iter()
            .map(|term| match term {
                Term::Conjunction(Conjunction::And) => "AND".to_string(),
                Term::Conjunction(Conjunction::Or) => "OR".to_string(),
                Term::Predicate(p) => render(p, dialect),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn render(p: &Predicate, dialect: Dialect) -> String {
    let column = dialect.quote_identifier(&p.column);
    let placeholders = || vec!["%s"; p.arity].join(", ");
    match p.op {
        Operator::Eq => format!("{column} = %s"),
        Operator::Ne => format!("{column} != %s"),
        Operator::Gt => format!("{column} > %s"),
        Operator::Lt => format!("{column} < %s"),
        Operator::Ge => format!("{column} >= %s"),
        Operator::Le => format!("{column} <= %s"),
        Operator::Like => match dialect {
            Dialect::Postgres => format!("{column} ILIKE %s"),
            Dialect::Sqlite => format!("{column} LIKE %s"),
        },
        // an empty list matches nothing, and excludes nothing
        Operator::In if p.arity == 0 => "1 = 0".to_string(),
        Operator::NotIn if p.arity == 0 => "1 = 1".to_string(),
        Operator::In => format!("{column} IN ({})", placeholders()),
        Operator::NotIn => format!("{column} NOT IN ({})", placeholders()),
    }
}

fn malformed(message: String) -> Error {
    Error::Query(QueryError::syntax(message))
}

/// Parse a filter string against its parameters.
pub fn parse(query: &str, params: &Params) -> Result<Filter> {
    let mut terms = Vec::new();
    let mut bindings = Vec::new();
    let mut last_end = 0;
    let mut expect_predicate = true;

    let mut parts: Vec<(&str, bool)> = Vec::new();
    for m in split_pattern().captures_iter(query) {
        let (Some(whole), Some(word)) = (m.get(0), m.get(1)) else {
            continue;
        };
        parts.push((&query[last_end..whole.start()], true));
        parts.push((word.as_str(), false));
        last_end = whole.end();
    }
    parts.push((&query[last_end..], true));

    for (part, is_statement) in parts {
        if is_statement != expect_predicate {
            return Err(malformed(format!("malformed query: {query}")));
        }
        if !is_statement {
            terms.push(Term::Conjunction(if part.eq_ignore_ascii_case("and") {
                Conjunction::And
            } else {
                Conjunction::Or
            }));
            expect_predicate = true;
            continue;
        }
        let caps = statement_pattern()
            .captures(part)
            .ok_or_else(|| malformed(format!("malformed query: {}", part.trim())))?;
        let column = caps[1].to_string();
        let op = Operator::parse(&caps[2])
            .ok_or_else(|| malformed(format!("unknown operator '{}'", &caps[2])))?;
        let param = &caps[3];
        let value = params
            .get(param)
            .ok_or_else(|| malformed(format!("missing value for parameter ':{param}'")))?;

        let arity = match (op.takes_list(), value) {
            (true, Value::Array(values)) => {
                bindings.extend(values.iter().cloned());
                values.len()
            }
            (true, other) => {
                return Err(malformed(format!(
                    "parameter ':{param}' must be a list, got {}",
                    other.type_name()
                )));
            }
            (false, Value::Array(_)) => {
                return Err(malformed(format!(
                    "parameter ':{param}' must be a single value"
                )));
            }
            (false, other) => {
                bindings.push(other.clone());
                1
            }
        };
        terms.push(Term::Predicate(Predicate { column, op, arity }));
        expect_predicate = false;
    }

    tracing::trace!(query, bindings = bindings.len(), "parsed filter");
    Ok(Filter { terms, bindings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn parses_and_or_chains() {
        let filter = parse(
            "name = :name and age >= :age OR age < :young",
            &params! { "name" => "a%", "age" => 18, "young" => 5 },
        )
        .unwrap();
        assert_eq!(
            filter.to_sql(Dialect::Sqlite),
            "\"name\" LIKE %s AND \"age\" >= %s OR \"age\" < %s"
        );
        assert_eq!(
            filter.bindings,
            vec![Value::from("a%"), Value::Int(18), Value::Int(5)]
        );
    }

    #[test]
    fn exact_and_case_insensitive_matches() {
        let p = params! { "v" => "x" };
        assert_eq!(parse("a == :v", &p).unwrap().to_sql(Dialect::Sqlite), "\"a\" = %s");
        assert_eq!(parse("a != :v", &p).unwrap().to_sql(Dialect::Sqlite), "\"a\" != %s");
        assert_eq!(parse("a = :v", &p).unwrap().to_sql(Dialect::Postgres), "\"a\" ILIKE %s");
    }

    #[test]
    fn in_expands_lists() {
        let filter = parse("target in :keys", &params! { "keys" => vec![1_i64, 2, 3] }).unwrap();
        assert_eq!(filter.to_sql(Dialect::Sqlite), "\"target\" IN (%s, %s, %s)");
        assert_eq!(filter.bindings.len(), 3);

        let filter = parse("target NOT IN :keys", &params! { "keys" => vec![4_i64] }).unwrap();
        assert_eq!(filter.to_sql(Dialect::Sqlite), "\"target\" NOT IN (%s)");

        let empty = parse("target in :keys", &params! { "keys" => Vec::<i64>::new() }).unwrap();
        assert_eq!(empty.to_sql(Dialect::Sqlite), "1 = 0");
        assert!(empty.bindings.is_empty());
    }

    #[test]
    fn malformed_filters_are_syntax_errors() {
        let p = params! { "v" => 1 };
        for query in ["a ~ :v", "a == v", "a == :v and", "and a == :v", "a == :missing"] {
            let err = parse(query, &p).unwrap_err();
            assert!(
                matches!(err, Error::Query(ref q) if q.kind == relorm_core::error::QueryErrorKind::Syntax),
                "{query}: {err}"
            );
        }
        assert!(parse("a in :v", &p).is_err());
        assert!(parse("a == :v", &params! { "v" => vec![1_i64] }).is_err());
    }
}
