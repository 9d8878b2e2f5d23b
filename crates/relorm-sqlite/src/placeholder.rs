//! `%s` placeholder translation.

/// Rewrite `%s` to `?` and `%%` to `%`, leaving quoted text untouched.
///
/// Returns the rewritten statement and the number of placeholders found.
pub fn translate(sql: &str) -> (String, usize) {
    let mut out = String::with_capacity(sql.len());
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                // a doubled quote inside a literal is an escaped quote and
                // toggles twice, so the literal stays open
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '%' => match chars.peek() {
                    Some('s') => {
                        chars.next();
                        count += 1;
                        out.push('?');
                    }
                    Some('%') => {
                        chars.next();
                        out.push('%');
                    }
                    _ => out.push('%'),
                },
                _ => out.push(c),
            },
        }
    }
    (out, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_become_question_marks() {
        assert_eq!(
            translate("SELECT * FROM \"t\" WHERE \"a\" = %s AND \"b\" IN (%s, %s)"),
            (
                "SELECT * FROM \"t\" WHERE \"a\" = ? AND \"b\" IN (?, ?)".to_string(),
                3
            )
        );
    }

    #[test]
    fn escapes_and_literals() {
        assert_eq!(
            translate("SELECT '%s', 'it''s %s', \"odd%s\" WHERE x LIKE '5%%' AND y = 10%%"),
            (
                "SELECT '%s', 'it''s %s', \"odd%s\" WHERE x LIKE '5%%' AND y = 10%".to_string(),
                0
            )
        );
    }
}
