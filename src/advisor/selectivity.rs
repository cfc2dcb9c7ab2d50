//! Selectivity and improvement estimation
//!
//! All pure arithmetic: per-column base selectivity from catalog statistics,
//! observed selectivity from the scan's filter counters, the blend of the
//! two, and the mapping from selectivity to a predicted cost-reduction
//! fraction.

use crate::analyzer::PredicateRole;
use crate::plan::ScanRecord;
use crate::stats::ColumnStats;

/// Uniform-range default selectivity, the industry-standard heuristic.
pub(crate) const RANGE_SELECTIVITY: f64 = 0.3333;

/// Selectivity for predicates the estimator cannot reason about.
pub(crate) const OTHER_SELECTIVITY: f64 = 0.5;

const SELECTIVITY_FLOOR: f64 = 1e-9;
const OBSERVED_WEIGHT: f64 = 0.6;
const BASE_WEIGHT: f64 = 0.4;
const CORRELATION_PENALTY: f64 = 0.15;
const COVERING_BOOST: f64 = 1.15;
pub(crate) const MAX_IMPROVEMENT: f64 = 0.98;

/// Expected fraction of rows matching a predicate on this column.
pub(crate) fn base_selectivity(role: PredicateRole, stats: &ColumnStats) -> f64 {
    match role {
        PredicateRole::Equality => (1.0 / stats.distinct) * (1.0 - stats.null_frac),
        PredicateRole::Range => RANGE_SELECTIVITY,
        PredicateRole::Other | PredicateRole::OrderBy => OTHER_SELECTIVITY,
    }
}

/// Fraction of scanned rows that survived the filter, when the scan
/// recorded any rows at all. The filter counter can exceed the node's
/// emitted row count, so the result is clamped into [0, 1].
pub(crate) fn observed_selectivity(scan: &ScanRecord) -> Option<f64> {
    if scan.rows_scanned == 0 {
        return None;
    }
    let ratio = scan.rows_removed as f64 / scan.rows_scanned as f64;
    Some((1.0 - ratio).clamp(0.0, 1.0))
}

/// Selectivity of the whole candidate set: the product of the per-column
/// estimates (independence assumption), blended 60/40 with the observed
/// value when one is available.
pub(crate) fn composite_selectivity(bases: &[f64], observed: Option<f64>) -> f64 {
    let base: f64 = bases.iter().product();
    let blended = match observed {
        Some(obs) => OBSERVED_WEIGHT * obs + BASE_WEIGHT * base,
        None => base,
    };
    blended.clamp(SELECTIVITY_FLOOR, 1.0)
}

/// Predicted fractional cost reduction for an index with the given
/// composite selectivity, discounted by how well the leading column's
/// physical order already matches its logical order.
pub(crate) fn improvement(selectivity: f64, leading_correlation: f64) -> f64 {
    let base = if selectivity < 0.001 {
        0.98
    } else if selectivity < 0.01 {
        0.95
    } else if selectivity < 0.05 {
        0.85
    } else if selectivity < 0.10 {
        0.70
    } else if selectivity < 0.20 {
        0.50
    } else {
        0.20
    };
    base * (1.0 - CORRELATION_PENALTY * leading_correlation.abs())
}

/// Index-only access is worth a flat boost, capped at the global maximum.
pub(crate) fn apply_covering_boost(improvement: f64) -> f64 {
    (improvement * COVERING_BOOST).min(MAX_IMPROVEMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(distinct: f64, null_frac: f64) -> ColumnStats {
        ColumnStats::from_catalog(distinct, null_frac, 0.0, 10_000_000.0)
    }

    fn scan(rows_scanned: u64, rows_removed: u64) -> ScanRecord {
        ScanRecord {
            table: "t".to_string(),
            rows_scanned,
            rows_removed,
            total_cost: 100.0,
            depth: 0,
            output_columns: None,
            plan_width: None,
        }
    }

    #[test]
    fn equality_selectivity_accounts_for_nulls() {
        let s = base_selectivity(PredicateRole::Equality, &stats(100.0, 0.0));
        assert!((s - 0.01).abs() < 1e-12);

        let s = base_selectivity(PredicateRole::Equality, &stats(100.0, 0.5));
        assert!((s - 0.005).abs() < 1e-12);
    }

    #[test]
    fn range_and_other_use_fixed_defaults() {
        assert_eq!(
            base_selectivity(PredicateRole::Range, &stats(2.0, 0.0)),
            RANGE_SELECTIVITY
        );
        assert_eq!(
            base_selectivity(PredicateRole::Other, &stats(2.0, 0.0)),
            OTHER_SELECTIVITY
        );
        assert_eq!(
            base_selectivity(PredicateRole::OrderBy, &stats(2.0, 0.0)),
            OTHER_SELECTIVITY
        );
    }

    #[test]
    fn observed_selectivity_handles_empty_and_overfull_scans() {
        assert_eq!(observed_selectivity(&scan(0, 0)), None);
        assert_eq!(observed_selectivity(&scan(1000, 0)), Some(1.0));
        assert_eq!(observed_selectivity(&scan(1000, 500)), Some(0.5));
        // Emitted rows plus removed rows need not add up: clamp at zero.
        assert_eq!(observed_selectivity(&scan(1, 999_999)), Some(0.0));
    }

    #[test]
    fn composite_blends_sixty_forty() {
        let s = composite_selectivity(&[0.2], Some(0.1));
        assert!((s - (0.6 * 0.1 + 0.4 * 0.2)).abs() < 1e-12);

        // Without an observation the base stands alone.
        assert_eq!(composite_selectivity(&[0.2], None), 0.2);
    }

    #[test]
    fn composite_multiplies_columns() {
        let s = composite_selectivity(&[0.2, 0.3333], None);
        assert!((s - 0.06666).abs() < 1e-9);
    }

    #[test]
    fn composite_is_clamped() {
        assert_eq!(composite_selectivity(&[0.0], None), SELECTIVITY_FLOOR);
        assert_eq!(composite_selectivity(&[2.0], None), 1.0);
    }

    #[test]
    fn improvement_buckets() {
        assert_eq!(improvement(0.0005, 0.0), 0.98);
        assert_eq!(improvement(0.005, 0.0), 0.95);
        assert_eq!(improvement(0.02, 0.0), 0.85);
        assert_eq!(improvement(0.07, 0.0), 0.70);
        assert_eq!(improvement(0.15, 0.0), 0.50);
        assert_eq!(improvement(0.5, 0.0), 0.20);
    }

    #[test]
    fn correlation_discounts_improvement() {
        let perfect = improvement(0.0005, 1.0);
        assert!((perfect - 0.98 * 0.85).abs() < 1e-12);

        // Sign does not matter, only magnitude.
        assert_eq!(improvement(0.0005, -1.0), perfect);
    }

    #[test]
    fn covering_boost_is_capped() {
        assert!((apply_covering_boost(0.5) - 0.575).abs() < 1e-12);
        assert_eq!(apply_covering_boost(0.95), MAX_IMPROVEMENT);
    }

    #[test]
    fn single_very_selective_column_clears_ninety_six_percent() {
        // A unique-ish column on a large table, scan output of one row.
        let stats = stats(10_000_000.0, 0.0);
        let base = base_selectivity(PredicateRole::Equality, &stats);
        let observed = observed_selectivity(&scan(1, 9_999_999));
        let selectivity = composite_selectivity(&[base], observed);
        let improvement = improvement(selectivity, 0.05);
        assert!(improvement >= 0.96, "got {improvement}");
    }
}
