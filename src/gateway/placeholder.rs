//! Positional-placeholder substitution
//!
//! Statements captured from drivers or pg_stat_statements carry `$N`
//! placeholders with no bound values. Before explaining, each placeholder is
//! replaced with a typed null so the planner keeps its type information
//! without a concrete value:
//!
//! - arithmetic or range-comparison context -> `NULL::integer`
//! - pattern-match context (LIKE/ILIKE and friends) -> `NULL::text`
//! - boolean-connective context -> `NULL::boolean`
//! - anything else -> `NULL::text`
//!
//! Quoted strings, quoted identifiers and comments are left untouched.

const NULL_INTEGER: &str = "NULL::integer";
const NULL_TEXT: &str = "NULL::text";
const NULL_BOOLEAN: &str = "NULL::boolean";

/// Replace every `$N` placeholder with a typed null.
pub fn substitute_placeholders(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        match c {
            '\'' => {
                let end = skip_single_quoted(bytes, i);
                out.push_str(&sql[i..end]);
                i = end;
            }
            '"' => {
                let end = skip_double_quoted(bytes, i);
                out.push_str(&sql[i..end]);
                i = end;
            }
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                let end = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map(|p| i + p + 1)
                    .unwrap_or(bytes.len());
                out.push_str(&sql[i..end]);
                i = end;
            }
            '$' if bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_digit()) =>
            {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                out.push_str(infer_null(&sql[..i], &sql[j..]));
                i = j;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn skip_single_quoted(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            // '' escapes a quote inside the literal
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_double_quoted(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Pick the null type from the tokens either side of the placeholder.
/// An operator immediately before the placeholder binds tighter than a
/// connective after it, so `a = $1 AND b` stays a value operand.
fn infer_null<'a>(before: &str, after: &str) -> &'a str {
    let prev = last_token(before);
    let next = first_token(after);
    let prev = prev.as_deref();
    let next = next.as_deref();

    if is_numeric_context(prev) {
        return NULL_INTEGER;
    }
    if is_pattern_context(prev) {
        return NULL_TEXT;
    }
    // The second bound of BETWEEN: `… BETWEEN x AND $N`.
    if prev == Some("AND") && is_between_upper_bound(before) {
        return NULL_INTEGER;
    }
    if let Some(p) = prev
        && is_operator(p)
    {
        return if is_numeric_context(next) {
            NULL_INTEGER
        } else {
            NULL_TEXT
        };
    }
    if is_numeric_context(next) {
        return NULL_INTEGER;
    }
    if is_boolean_context(prev) || is_boolean_context(next) {
        return NULL_BOOLEAN;
    }
    NULL_TEXT
}

fn is_operator(token: &str) -> bool {
    token.chars().all(|c| OPERATOR_CHARS.contains(&c))
}

/// True when the text before the placeholder ends in `BETWEEN <operand> AND`.
fn is_between_upper_bound(before: &str) -> bool {
    let mut words: Vec<String> = Vec::new();
    let mut rest = before.trim_end();
    for _ in 0..3 {
        match last_token(rest) {
            Some(token) => {
                let len = token.len();
                words.push(token);
                rest = rest.trim_end();
                rest = &rest[..rest.len().saturating_sub(len)];
                rest = rest.trim_end();
            }
            None => break,
        }
    }
    words.len() == 3 && words[0] == "AND" && words[2] == "BETWEEN"
}

fn is_numeric_context(token: Option<&str>) -> bool {
    matches!(
        token,
        Some("<") | Some(">") | Some("<=") | Some(">=")
            | Some("+") | Some("-") | Some("*") | Some("/") | Some("%")
            | Some("BETWEEN")
    )
}

fn is_pattern_context(token: Option<&str>) -> bool {
    matches!(
        token,
        Some("LIKE") | Some("ILIKE") | Some("SIMILAR") | Some("~~") | Some("~~*")
    )
}

fn is_boolean_context(token: Option<&str>) -> bool {
    matches!(token, Some("AND") | Some("OR") | Some("NOT"))
}

const OPERATOR_CHARS: &[char] = &['<', '>', '=', '+', '-', '*', '/', '%', '~', '!'];

/// Last word or operator run before the placeholder, uppercased.
fn last_token(before: &str) -> Option<String> {
    let trimmed = before.trim_end();
    if trimmed.is_empty() {
        return None;
    }
    let last = trimmed.chars().last()?;
    if OPERATOR_CHARS.contains(&last) {
        let run: String = trimmed
            .chars()
            .rev()
            .take_while(|c| OPERATOR_CHARS.contains(c))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Some(run)
    } else if last.is_ascii_alphanumeric() || last == '_' {
        let run: String = trimmed
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Some(run.to_ascii_uppercase())
    } else {
        None
    }
}

/// First word or operator run after the placeholder, uppercased.
fn first_token(after: &str) -> Option<String> {
    let trimmed = after.trim_start();
    let first = trimmed.chars().next()?;
    if OPERATOR_CHARS.contains(&first) {
        Some(
            trimmed
                .chars()
                .take_while(|c| OPERATOR_CHARS.contains(c))
                .collect(),
        )
    } else if first.is_ascii_alphanumeric() || first == '_' {
        Some(
            trimmed
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_ascii_uppercase(),
        )
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_comparison_becomes_integer() {
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE a > $1"),
            "SELECT * FROM t WHERE a > NULL::integer"
        );
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE $1 <= b"),
            "SELECT * FROM t WHERE NULL::integer <= b"
        );
    }

    #[test]
    fn arithmetic_becomes_integer() {
        assert_eq!(
            substitute_placeholders("SELECT a + $1 FROM t"),
            "SELECT a + NULL::integer FROM t"
        );
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE a = $1 * 10"),
            "SELECT * FROM t WHERE a = NULL::integer * 10"
        );
    }

    #[test]
    fn pattern_match_becomes_text() {
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE name LIKE $1"),
            "SELECT * FROM t WHERE name LIKE NULL::text"
        );
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE name ILIKE $2"),
            "SELECT * FROM t WHERE name ILIKE NULL::text"
        );
    }

    #[test]
    fn boolean_connective_becomes_boolean() {
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE $1 AND b"),
            "SELECT * FROM t WHERE NULL::boolean AND b"
        );
    }

    #[test]
    fn equality_falls_back_to_text() {
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE email = $1"),
            "SELECT * FROM t WHERE email = NULL::text"
        );
    }

    #[test]
    fn between_bounds_are_numeric() {
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE a BETWEEN $1 AND 10"),
            "SELECT * FROM t WHERE a BETWEEN NULL::integer AND 10"
        );
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE a BETWEEN 1 AND $2"),
            "SELECT * FROM t WHERE a BETWEEN 1 AND NULL::integer"
        );
    }

    #[test]
    fn trailing_connective_does_not_make_an_operand_boolean() {
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE a = $1 AND b = 2"),
            "SELECT * FROM t WHERE a = NULL::text AND b = 2"
        );
    }

    #[test]
    fn multi_digit_placeholders() {
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE a > $12"),
            "SELECT * FROM t WHERE a > NULL::integer"
        );
    }

    #[test]
    fn dollar_signs_in_strings_survive() {
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE note = '$1 worth'"),
            "SELECT * FROM t WHERE note = '$1 worth'"
        );
        assert_eq!(
            substitute_placeholders("SELECT * FROM t WHERE a = 'it''s $1' AND b > $2"),
            "SELECT * FROM t WHERE a = 'it''s $1' AND b > NULL::integer"
        );
    }

    #[test]
    fn quoted_identifiers_survive() {
        assert_eq!(
            substitute_placeholders(r#"SELECT "$1" FROM t WHERE a = $1"#),
            r#"SELECT "$1" FROM t WHERE a = NULL::text"#
        );
    }

    #[test]
    fn statement_without_placeholders_is_unchanged() {
        let sql = "SELECT * FROM t WHERE a = 1";
        assert_eq!(substitute_placeholders(sql), sql);
    }
}
