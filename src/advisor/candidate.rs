//! Candidate assembly
//!
//! The pure middle of the recommendation pipeline: ordering candidate
//! columns into a composite key, folding equality-against-literal columns
//! into a partial-index predicate, turning projected columns into INCLUDE
//! lists, and the over-indexing guard.

use crate::analyzer::PredicateRole;
use crate::config::AdvisorConfig;
use crate::plan::ScanRecord;
use crate::stats::TableHealth;

/// A scan's projected row must be at most this wide for covering to pay.
const MAX_COVER_WIDTH: u64 = 256;

/// One column under consideration for the composite key.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub name: String,
    /// Effective role: the parsed role, or `Other` after a statistics
    /// downgrade.
    pub role: PredicateRole,
    pub base_selectivity: f64,
    pub correlation: f64,
    /// Literal bound by an equality predicate, if any.
    pub literal: Option<String>,
}

/// Composite ordering: equality columns first, then range, then other,
/// with order-by-only columns trailing. Within a group, more selective
/// first; name breaks ties so the result is deterministic.
pub(crate) fn order_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        group_rank(a.role)
            .cmp(&group_rank(b.role))
            .then(a.base_selectivity.total_cmp(&b.base_selectivity))
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn group_rank(role: PredicateRole) -> u8 {
    match role {
        PredicateRole::Equality => 0,
        PredicateRole::Range => 1,
        PredicateRole::Other => 2,
        PredicateRole::OrderBy => 3,
    }
}

/// Fold equality-against-literal columns into a filter predicate.
///
/// Returns the columns that stay in the key and the predicate, if any.
/// When every candidate would be folded away, the most selective folded
/// column is retained as the key (a partial index must still index
/// something) and its own conjunct is dropped; a predicate emptied this
/// way disappears entirely.
pub(crate) fn split_partial(
    candidates: Vec<Candidate>,
    enabled: bool,
) -> (Vec<Candidate>, Option<String>) {
    if !enabled {
        return (candidates, None);
    }

    let (folded, kept): (Vec<Candidate>, Vec<Candidate>) = candidates
        .into_iter()
        .partition(|c| c.role == PredicateRole::Equality && c.literal.is_some());

    if folded.is_empty() {
        return (kept, None);
    }

    if kept.is_empty() {
        // Ordered input means the first folded column is the most selective.
        let mut folded = folded;
        let leader = folded.remove(0);
        let predicate = conjunction(&folded);
        return (vec![leader], predicate);
    }

    let predicate = conjunction(&folded);
    (kept, predicate)
}

fn conjunction(folded: &[Candidate]) -> Option<String> {
    let conjuncts: Vec<String> = folded
        .iter()
        .filter_map(|c| c.literal.as_ref().map(|lit| format!("{} = {lit}", c.name)))
        .collect();
    if conjuncts.is_empty() {
        None
    } else {
        Some(conjuncts.join(" AND "))
    }
}

/// Columns to carry as INCLUDE payload: the scan's projected columns minus
/// the indexed ones, when the projection is small enough to make an
/// index-only scan plausible.
pub(crate) fn covering_includes(
    scan: &ScanRecord,
    indexed: &[String],
    options: &AdvisorConfig,
) -> Vec<String> {
    if !options.covering_enabled {
        return Vec::new();
    }
    let Some(outputs) = &scan.output_columns else {
        return Vec::new();
    };
    // Unknown width counts as wide.
    if scan.plan_width.unwrap_or(u64::MAX) > MAX_COVER_WIDTH {
        return Vec::new();
    }

    let mut includes: Vec<String> = Vec::new();
    for column in outputs {
        if indexed.iter().any(|c| c == column) || includes.iter().any(|c| c == column) {
            continue;
        }
        includes.push(column.clone());
    }

    if includes.is_empty() || includes.len() > options.max_include_columns {
        return Vec::new();
    }
    includes
}

/// Warn when the table is already crowded with indexes or write-heavy
/// enough that another index would tax every write. Never suppresses the
/// proposal.
pub(crate) fn over_indexing_warning(table: &str, health: &TableHealth) -> Option<String> {
    let crowded = health.index_count >= 5;
    let write_heavy = health.write_ratio > 0.5
        && f64::from(health.index_count) * 0.15 * health.write_ratio > 0.3;

    if crowded || write_heavy {
        Some(format!(
            "table {table} already has {} indexes and a write ratio of {:.2}; another index will slow every write",
            health.index_count, health.write_ratio
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, role: PredicateRole, base: f64) -> Candidate {
        Candidate {
            name: name.to_string(),
            role,
            base_selectivity: base,
            correlation: 0.0,
            literal: None,
        }
    }

    fn with_literal(mut c: Candidate, literal: &str) -> Candidate {
        c.literal = Some(literal.to_string());
        c
    }

    fn names(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn equality_precedes_range_precedes_other_precedes_order_by() {
        let mut candidates = vec![
            candidate("sorted", PredicateRole::OrderBy, 0.5),
            candidate("fuzzy", PredicateRole::Other, 0.5),
            candidate("created_at", PredicateRole::Range, 0.3333),
            candidate("status", PredicateRole::Equality, 0.2),
        ];
        order_candidates(&mut candidates);
        assert_eq!(names(&candidates), ["status", "created_at", "fuzzy", "sorted"]);
    }

    #[test]
    fn more_selective_first_within_a_group() {
        let mut candidates = vec![
            candidate("coarse", PredicateRole::Equality, 0.2),
            candidate("fine", PredicateRole::Equality, 0.0001),
        ];
        order_candidates(&mut candidates);
        assert_eq!(names(&candidates), ["fine", "coarse"]);
    }

    #[test]
    fn ties_break_by_name() {
        let mut candidates = vec![
            candidate("b", PredicateRole::Range, 0.3333),
            candidate("a", PredicateRole::Range, 0.3333),
        ];
        order_candidates(&mut candidates);
        assert_eq!(names(&candidates), ["a", "b"]);
    }

    #[test]
    fn literal_equality_folds_into_predicate() {
        let candidates = vec![
            with_literal(candidate("status", PredicateRole::Equality, 0.2), "'pending'"),
            candidate("created_at", PredicateRole::Range, 0.3333),
        ];
        let (kept, predicate) = split_partial(candidates, true);

        assert_eq!(names(&kept), ["created_at"]);
        assert_eq!(predicate.as_deref(), Some("status = 'pending'"));
    }

    #[test]
    fn sole_folded_column_is_retained_without_predicate() {
        let candidates = vec![with_literal(
            candidate("k", PredicateRole::Equality, 0.001),
            "7",
        )];
        let (kept, predicate) = split_partial(candidates, true);

        assert_eq!(names(&kept), ["k"]);
        assert_eq!(predicate, None);
    }

    #[test]
    fn all_folded_keeps_leader_and_remaining_conjuncts() {
        let candidates = vec![
            with_literal(candidate("a", PredicateRole::Equality, 0.0001), "1"),
            with_literal(candidate("b", PredicateRole::Equality, 0.1), "2"),
        ];
        let (kept, predicate) = split_partial(candidates, true);

        assert_eq!(names(&kept), ["a"]);
        assert_eq!(predicate.as_deref(), Some("b = 2"));
    }

    #[test]
    fn disabled_partial_keeps_everything_in_the_key() {
        let candidates = vec![
            with_literal(candidate("status", PredicateRole::Equality, 0.2), "'pending'"),
            candidate("created_at", PredicateRole::Range, 0.3333),
        ];
        let (kept, predicate) = split_partial(candidates, false);

        assert_eq!(names(&kept), ["status", "created_at"]);
        assert_eq!(predicate, None);
    }

    #[test]
    fn equality_without_literal_stays_in_the_key() {
        let candidates = vec![
            candidate("user_id", PredicateRole::Equality, 0.001),
            candidate("created_at", PredicateRole::Range, 0.3333),
        ];
        let (kept, predicate) = split_partial(candidates, true);

        assert_eq!(names(&kept), ["user_id", "created_at"]);
        assert_eq!(predicate, None);
    }

    fn scan_with_outputs(outputs: &[&str], width: Option<u64>) -> ScanRecord {
        ScanRecord {
            table: "t".to_string(),
            rows_scanned: 100,
            rows_removed: 0,
            total_cost: 10.0,
            depth: 0,
            output_columns: Some(outputs.iter().map(|s| s.to_string()).collect()),
            plan_width: width,
        }
    }

    #[test]
    fn covering_excludes_indexed_columns() {
        let scan = scan_with_outputs(&["a", "b", "k"], Some(24));
        let includes = covering_includes(&scan, &["k".to_string()], &AdvisorConfig::default());
        assert_eq!(includes, ["a", "b"]);
    }

    #[test]
    fn covering_skips_wide_or_unknown_rows() {
        let wide = scan_with_outputs(&["a"], Some(4_000));
        assert!(covering_includes(&wide, &[], &AdvisorConfig::default()).is_empty());

        let unknown = scan_with_outputs(&["a"], None);
        assert!(covering_includes(&unknown, &[], &AdvisorConfig::default()).is_empty());
    }

    #[test]
    fn covering_respects_the_column_cap() {
        let scan = scan_with_outputs(&["a", "b", "c", "d", "e", "f"], Some(48));
        assert!(covering_includes(&scan, &[], &AdvisorConfig::default()).is_empty());
    }

    #[test]
    fn covering_can_be_disabled() {
        let scan = scan_with_outputs(&["a"], Some(8));
        let options = AdvisorConfig {
            covering_enabled: false,
            ..AdvisorConfig::default()
        };
        assert!(covering_includes(&scan, &[], &options).is_empty());
    }

    #[test]
    fn crowded_table_warns() {
        let health = TableHealth {
            index_count: 7,
            write_ratio: 0.7,
        };
        let warning = over_indexing_warning("orders", &health);
        assert!(warning.is_some());
        assert!(warning.unwrap().contains("7 indexes"));
    }

    #[test]
    fn write_heavy_table_warns_below_index_threshold() {
        // 4 indexes, heavy writes: 4 * 0.15 * 0.8 = 0.48 > 0.3
        let health = TableHealth {
            index_count: 4,
            write_ratio: 0.8,
        };
        assert!(over_indexing_warning("t", &health).is_some());
    }

    #[test]
    fn quiet_table_does_not_warn() {
        let health = TableHealth {
            index_count: 2,
            write_ratio: 0.3,
        };
        assert!(over_indexing_warning("t", &health).is_none());
    }
}
