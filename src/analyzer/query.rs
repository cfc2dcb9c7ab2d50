//! Query-shape representation
//!
//! `ParsedQuery` decouples the analyser from the PostgreSQL AST. It carries
//! only what candidate generation needs: which base tables appear, how
//! aliases resolve, which columns are constrained and in what structural
//! position. Collections are ordered so that two parses of the same SQL
//! compare equal and iterate identically.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Structural position of a column in the statement.
///
/// Roles are ordered by strength: once a column is seen in an equality
/// predicate, a later range or miscellaneous appearance does not weaken it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum PredicateRole {
    Equality,
    Range,
    Other,
    OrderBy,
}

impl PredicateRole {
    /// Strength used for the upgrade-only classification rule.
    pub(crate) fn strength(self) -> u8 {
        match self {
            PredicateRole::Equality => 3,
            PredicateRole::Range => 2,
            PredicateRole::Other => 1,
            PredicateRole::OrderBy => 0,
        }
    }
}

/// Everything the recommender needs to know about one parsed statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedQuery {
    /// Base tables in first-appearance order, deduplicated.
    pub tables: Vec<String>,

    /// Alias (or bare table name) to table. Resolution is strictly
    /// non-recursive: one lookup, never chained.
    pub aliases: BTreeMap<String, String>,

    /// Columns referenced in WHERE predicates.
    pub where_columns: BTreeSet<String>,

    /// Columns referenced in JOIN conditions.
    pub join_columns: BTreeSet<String>,

    /// Columns referenced in ORDER BY. May overlap with the sets above.
    pub order_by_columns: BTreeSet<String>,

    /// Column to owning table, for every column that could be disambiguated.
    pub column_tables: BTreeMap<String, String>,

    /// Column to its strongest observed predicate role.
    pub roles: BTreeMap<String, PredicateRole>,

    /// Column to rendered literal, for equality-against-literal predicates.
    pub equality_literals: BTreeMap<String, String>,

    /// Columns that could not be resolved to a single table. These are
    /// excluded from `column_tables` and from candidate generation.
    pub ambiguous: BTreeSet<String>,
}

impl ParsedQuery {
    /// Record a base table and its alias mapping.
    pub(crate) fn register_table(&mut self, table: &str, alias: Option<&str>) {
        if !self.tables.iter().any(|t| t == table) {
            self.tables.push(table.to_string());
        }
        let key = alias.unwrap_or(table);
        self.aliases.insert(key.to_string(), table.to_string());
    }

    /// Resolve a column qualifier through the alias map. One step only:
    /// an alias that maps to itself resolves to itself and stops there.
    pub(crate) fn resolve_qualifier(&self, qualifier: &str) -> String {
        self.aliases
            .get(qualifier)
            .cloned()
            .unwrap_or_else(|| qualifier.to_string())
    }

    /// Bind a column to a table, demoting it to ambiguous when a second
    /// table claims the same column name.
    pub(crate) fn bind_column(&mut self, column: &str, table: Option<String>) {
        if self.ambiguous.contains(column) {
            return;
        }
        match table {
            Some(table) => match self.column_tables.get(column) {
                Some(existing) if existing != &table => {
                    self.column_tables.remove(column);
                    self.ambiguous.insert(column.to_string());
                }
                _ => {
                    self.column_tables.insert(column.to_string(), table);
                }
            },
            None => {
                self.ambiguous.insert(column.to_string());
                self.column_tables.remove(column);
            }
        }
    }

    /// Apply the upgrade-only role rule: equality > range > other > order-by.
    pub(crate) fn upgrade_role(&mut self, column: &str, role: PredicateRole) {
        match self.roles.get(column) {
            Some(existing) if existing.strength() >= role.strength() => {}
            _ => {
                self.roles.insert(column.to_string(), role);
            }
        }
    }

    /// Owning table for a column, when unambiguous.
    pub fn qualifying_table(&self, column: &str) -> Option<&str> {
        self.column_tables.get(column).map(String::as_str)
    }

    /// Candidate columns for one table: WHERE and JOIN columns bound to it,
    /// plus its ORDER BY columns. Ambiguous columns never qualify.
    pub fn candidates_for(&self, table: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for column in self
            .where_columns
            .iter()
            .chain(self.join_columns.iter())
            .chain(self.order_by_columns.iter())
        {
            if self.qualifying_table(column) == Some(table) && !out.iter().any(|c| c == column) {
                out.push(column.clone());
            }
        }
        out
    }

    /// Strongest role recorded for a column, defaulting to order-by for
    /// columns that only appear in ORDER BY.
    pub fn role_of(&self, column: &str) -> PredicateRole {
        self.roles
            .get(column)
            .copied()
            .unwrap_or(PredicateRole::OrderBy)
    }
}
