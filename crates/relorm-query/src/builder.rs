//! Statement text for INSERT, UPDATE and DELETE.
//!
//! Values are never inlined; each function returns SQL with `%s`
//! placeholders in the order the caller binds its values.

use relorm_core::{Dialect, KEY_FIELD};

/// `INSERT INTO "t" ("a", "b") VALUES (%s, %s)`.
///
/// Without columns the row is inserted with defaults only.
pub fn insert_sql(dialect: Dialect, table: &str, columns: &[&str]) -> String {
    let table = dialect.quote_identifier(table);
    if columns.is_empty() {
        return format!("INSERT INTO {table} DEFAULT VALUES");
    }
    let names: Vec<String> = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect();
    let placeholders = vec!["%s"; columns.len()].join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        names.join(", ")
    )
}

/// `UPDATE "t" SET "a" = %s, "b" = %s WHERE "key" = %s`.
///
/// The key binds last.
pub fn update_sql(dialect: Dialect, table: &str, columns: &[&str]) -> String {
    let sets: Vec<String> = columns
        .iter()
        .map(|c| format!("{} = %s", dialect.quote_identifier(c)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = %s",
        dialect.quote_identifier(table),
        sets.join(", "),
        dialect.quote_identifier(KEY_FIELD)
    )
}

/// `DELETE FROM "t" WHERE "key" IN (%s, ...)` for `count` keys.
pub fn delete_sql(dialect: Dialect, table: &str, count: usize) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        dialect.quote_identifier(table),
        dialect.quote_identifier(KEY_FIELD),
        vec!["%s"; count].join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_statement() {
        assert_eq!(
            insert_sql(Dialect::Sqlite, "hello_address", &["street", "contact"]),
            "INSERT INTO \"hello_address\" (\"street\", \"contact\") VALUES (%s, %s)"
        );
        assert_eq!(
            insert_sql(Dialect::Sqlite, "tag", &[]),
            "INSERT INTO \"tag\" DEFAULT VALUES"
        );
    }

    #[test]
    fn update_statement_binds_key_last() {
        assert_eq!(
            update_sql(Dialect::Sqlite, "contact", &["name", "age"]),
            "UPDATE \"contact\" SET \"name\" = %s, \"age\" = %s WHERE \"key\" = %s"
        );
    }

    #[test]
    fn delete_statement() {
        assert_eq!(
            delete_sql(Dialect::Postgres, "contact", 3),
            "DELETE FROM \"contact\" WHERE \"key\" IN (%s, %s, %s)"
        );
    }
}
