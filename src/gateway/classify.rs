//! Statement classification
//!
//! Classifies a statement by its leading token before anything is sent to
//! the database. The explain path refuses to analyse anything that is not a
//! plain read.

use serde::Serialize;
use strum_macros::{Display, EnumString, IntoStaticStr};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum StatementClass {
    Read,
    Insert,
    Update,
    Delete,
    Ddl,
    Other,
}

impl StatementClass {
    /// Classify a statement by its leading keyword. Comments are skipped.
    /// A leading `WITH` is resolved by scanning for the first verb outside
    /// the CTE parentheses, so `WITH … DELETE FROM …` still classifies as a
    /// delete.
    pub fn of(sql: &str) -> Self {
        let mut tokens = keywords_at_top_level(sql);
        match tokens.next().as_deref() {
            Some("SELECT") | Some("VALUES") | Some("TABLE") => StatementClass::Read,
            Some("INSERT") => StatementClass::Insert,
            Some("UPDATE") => StatementClass::Update,
            Some("DELETE") => StatementClass::Delete,
            Some("CREATE") | Some("ALTER") | Some("DROP") | Some("TRUNCATE") => StatementClass::Ddl,
            Some("WITH") => {
                for token in tokens {
                    match token.as_str() {
                        "SELECT" | "VALUES" | "TABLE" => return StatementClass::Read,
                        "INSERT" => return StatementClass::Insert,
                        "UPDATE" => return StatementClass::Update,
                        "DELETE" => return StatementClass::Delete,
                        _ => {}
                    }
                }
                StatementClass::Other
            }
            _ => StatementClass::Other,
        }
    }

    pub fn is_read(self) -> bool {
        self == StatementClass::Read
    }
}

/// Uppercased word tokens at parenthesis depth zero, with `--` and `/* */`
/// comments and quoted strings skipped.
fn keywords_at_top_level(sql: &str) -> impl Iterator<Item = String> + '_ {
    let mut out = Vec::new();
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut depth: i32 = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        // Line comment
        if c == '-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        // Block comment (non-nested)
        if c == '/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            continue;
        }
        // String literal
        if c == '\'' {
            i += 1;
            while i < bytes.len() {
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                i += 1;
            }
            continue;
        }
        if c == '(' {
            depth += 1;
            i += 1;
            continue;
        }
        if c == ')' {
            depth = depth.saturating_sub(1);
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() {
                let cc = bytes[i] as char;
                if cc.is_ascii_alphanumeric() || cc == '_' {
                    i += 1;
                } else {
                    break;
                }
            }
            if depth == 0 {
                out.push(sql[start..i].to_ascii_uppercase());
            }
            continue;
        }
        i += 1;
    }

    out.into_iter()
}
