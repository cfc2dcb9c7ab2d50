//! Proposals and DDL emission

use crate::analyzer::PredicateRole;
use serde::Serialize;
use std::collections::BTreeMap;

/// PostgreSQL truncates identifiers to NAMEDATALEN - 1 bytes.
const MAX_IDENTIFIER_BYTES: usize = 63;

/// One recommended index, ready to present.
#[derive(Debug, Clone, Serialize)]
pub struct Proposal {
    pub table: String,
    /// Indexed columns, most useful first. Never empty, never duplicated.
    pub columns: Vec<String>,
    /// Partial-index predicate, when equality-against-literal columns were
    /// folded out of the key.
    pub filter_predicate: Option<String>,
    /// Non-key columns carried for index-only access. Disjoint from
    /// `columns`.
    pub include_columns: Vec<String>,
    /// Predicate role of every column that shaped this proposal.
    pub roles: BTreeMap<String, PredicateRole>,
    /// Predicted fractional cost reduction, in [0, 0.98].
    pub improvement: f64,
    pub rationale: String,
    /// Present when the over-indexing guard fired. Never suppresses the
    /// proposal.
    pub warning: Option<String>,
    /// Fully-formed CREATE INDEX statement.
    pub ddl: String,
}

impl Proposal {
    /// Key under which duplicates across scans collapse.
    pub(crate) fn dedup_key(&self) -> (String, Vec<String>, Option<String>, Vec<String>) {
        (
            self.table.clone(),
            self.columns.clone(),
            self.filter_predicate.clone(),
            self.include_columns.clone(),
        )
    }
}

/// Build `idx_<table>_<col1>_<col2>…` with `_partial`/`_covering` markers,
/// truncated so the whole identifier stays platform-safe. The markers
/// survive truncation.
pub(crate) fn index_name(table: &str, columns: &[String], partial: bool, covering: bool) -> String {
    let mut suffix = String::new();
    if partial {
        suffix.push_str("_partial");
    }
    if covering {
        suffix.push_str("_covering");
    }

    let mut base = format!("idx_{table}");
    for column in columns {
        base.push('_');
        base.push_str(column);
    }

    let budget = MAX_IDENTIFIER_BYTES.saturating_sub(suffix.len());
    if base.len() > budget {
        let mut cut = budget;
        while cut > 0 && !base.is_char_boundary(cut) {
            cut -= 1;
        }
        base.truncate(cut);
    }

    format!("{base}{suffix}")
}

/// Canonical DDL: one line, canonical whitespace, trailing semicolon, no
/// platform-specific modifiers.
pub(crate) fn render_ddl(
    name: &str,
    table: &str,
    columns: &[String],
    include: &[String],
    predicate: Option<&str>,
) -> String {
    let mut ddl = format!("CREATE INDEX {name} ON {table} ({})", columns.join(", "));
    if !include.is_empty() {
        ddl.push_str(" INCLUDE (");
        ddl.push_str(&include.join(", "));
        ddl.push(')');
    }
    if let Some(predicate) = predicate {
        ddl.push_str(" WHERE ");
        ddl.push_str(predicate);
    }
    ddl.push(';');
    ddl
}
