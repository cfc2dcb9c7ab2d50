//! Plan inspection
//!
//! Walks the JSON document produced by `EXPLAIN (FORMAT JSON, VERBOSE)` and
//! extracts the full-table scans the recommender cares about, plus the
//! top-level plan metrics. Everything else in the plan tree is traversed but
//! not recorded.

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// Top-level numbers for one explained statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanMetrics {
    pub total_cost: f64,
    /// Actual rows when the statement was analysed, planner estimate otherwise.
    pub actual_rows: u64,
    /// Wall-clock execution time; only present for analysed statements.
    pub execution_ms: Option<f64>,
}

/// One sequential-scan node from the plan tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRecord {
    pub table: String,
    /// Actual rows when analysed, planner estimate otherwise.
    pub rows_scanned: u64,
    /// Rows the filter rejected. Zero when the plan carries no filter stats.
    pub rows_removed: u64,
    pub total_cost: f64,
    /// Depth of the node below the plan root.
    pub depth: usize,
    /// Columns the planner projects out of this scan (EXPLAIN VERBOSE), with
    /// non-column expressions dropped. `None` when the plan does not expose
    /// projections.
    pub output_columns: Option<Vec<String>>,
    /// Planner's estimated row width in bytes.
    pub plan_width: Option<u64>,
}

/// Extract plan metrics and all sequential scans from an explain document.
///
/// `fingerprint` identifies the offending statement in errors.
pub fn inspect(document: &Value, fingerprint: &str) -> Result<(PlanMetrics, Vec<ScanRecord>)> {
    // EXPLAIN (FORMAT JSON) wraps the plan in a one-element array.
    let entry = match document {
        Value::Array(items) => items.first().ok_or_else(|| unparseable(fingerprint, "empty explain document"))?,
        other => other,
    };

    let root = entry
        .get("Plan")
        .ok_or_else(|| unparseable(fingerprint, "missing Plan node"))?;

    let total_cost = root
        .get("Total Cost")
        .and_then(Value::as_f64)
        .ok_or_else(|| unparseable(fingerprint, "plan root has no Total Cost"))?;

    let metrics = PlanMetrics {
        total_cost,
        actual_rows: node_rows(root),
        execution_ms: entry.get("Execution Time").and_then(Value::as_f64),
    };

    let mut scans = Vec::new();
    walk(root, 0, fingerprint, &mut scans)?;

    Ok((metrics, scans))
}

fn unparseable(fingerprint: &str, reason: &str) -> Error {
    Error::PlanUnparseable {
        fingerprint: fingerprint.to_string(),
        reason: reason.to_string(),
    }
}

/// Pre-order walk. Children are visited regardless of the parent's type:
/// a sequential scan under a join or sort still counts.
fn walk(node: &Value, depth: usize, fingerprint: &str, scans: &mut Vec<ScanRecord>) -> Result<()> {
    let node_type = node.get("Node Type").and_then(Value::as_str).unwrap_or("");

    if node_type == "Seq Scan" {
        let table = node
            .get("Relation Name")
            .and_then(Value::as_str)
            .ok_or_else(|| unparseable(fingerprint, "Seq Scan without Relation Name"))?;
        let total_cost = node
            .get("Total Cost")
            .and_then(Value::as_f64)
            .ok_or_else(|| unparseable(fingerprint, "Seq Scan without Total Cost"))?;

        scans.push(ScanRecord {
            table: table.to_string(),
            rows_scanned: node_rows(node),
            rows_removed: node
                .get("Rows Removed by Filter")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            total_cost,
            depth,
            output_columns: output_columns(node),
            plan_width: node.get("Plan Width").and_then(Value::as_u64),
        });
    }

    if let Some(children) = node.get("Plans").and_then(Value::as_array) {
        for child in children {
            walk(child, depth + 1, fingerprint, scans)?;
        }
    }

    Ok(())
}

/// "Actual Rows" when the statement was analysed, "Plan Rows" otherwise.
fn node_rows(node: &Value) -> u64 {
    node.get("Actual Rows")
        .or_else(|| node.get("Plan Rows"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// The scan's projected columns, qualifier stripped. Entries that are not
/// plain (possibly qualified) identifiers — expressions, casts, stars — are
/// skipped; an empty result collapses to `None`.
fn output_columns(node: &Value) -> Option<Vec<String>> {
    let entries = node.get("Output").and_then(Value::as_array)?;
    let columns: Vec<String> = entries
        .iter()
        .filter_map(Value::as_str)
        .filter_map(simple_identifier)
        .collect();
    if columns.is_empty() { None } else { Some(columns) }
}

fn simple_identifier(entry: &str) -> Option<String> {
    let name = entry.rsplit('.').next().unwrap_or(entry);
    let is_plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    let qualifier_plain = entry
        .rsplit('.')
        .skip(1)
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if is_plain && qualifier_plain {
        Some(name.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analysed_plan() -> Value {
        json!([{
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "users",
                "Startup Cost": 0.0,
                "Total Cost": 1693.0,
                "Plan Rows": 1,
                "Plan Width": 40,
                "Actual Rows": 1,
                "Rows Removed by Filter": 99999,
                "Output": ["users.id", "users.email"]
            },
            "Planning Time": 0.2,
            "Execution Time": 12.5
        }])
    }

    #[test]
    fn extracts_metrics_and_single_scan() {
        let (metrics, scans) = inspect(&analysed_plan(), "fp").unwrap();

        assert_eq!(metrics.total_cost, 1693.0);
        assert_eq!(metrics.actual_rows, 1);
        assert_eq!(metrics.execution_ms, Some(12.5));

        assert_eq!(scans.len(), 1);
        let scan = &scans[0];
        assert_eq!(scan.table, "users");
        assert_eq!(scan.rows_scanned, 1);
        assert_eq!(scan.rows_removed, 99999);
        assert_eq!(scan.depth, 0);
        assert_eq!(
            scan.output_columns.as_deref(),
            Some(["id".to_string(), "email".to_string()].as_slice())
        );
    }

    #[test]
    fn nested_scans_are_found_at_depth() {
        let plan = json!([{
            "Plan": {
                "Node Type": "Hash Join",
                "Total Cost": 5000.0,
                "Plan Rows": 100,
                "Plans": [
                    {
                        "Node Type": "Seq Scan",
                        "Relation Name": "orders",
                        "Total Cost": 3000.0,
                        "Plan Rows": 120000
                    },
                    {
                        "Node Type": "Hash",
                        "Total Cost": 900.0,
                        "Plan Rows": 5000,
                        "Plans": [{
                            "Node Type": "Seq Scan",
                            "Relation Name": "users",
                            "Total Cost": 800.0,
                            "Plan Rows": 5000
                        }]
                    }
                ]
            }
        }]);

        let (metrics, scans) = inspect(&plan, "fp").unwrap();
        assert_eq!(metrics.execution_ms, None);
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].table, "orders");
        assert_eq!(scans[0].depth, 1);
        assert_eq!(scans[1].table, "users");
        assert_eq!(scans[1].depth, 2);
        // Plain EXPLAIN: planner estimates stand in for actual rows.
        assert_eq!(scans[0].rows_scanned, 120000);
        assert_eq!(scans[0].rows_removed, 0);
    }

    #[test]
    fn index_scans_are_not_recorded() {
        let plan = json!([{
            "Plan": {
                "Node Type": "Index Scan",
                "Relation Name": "users",
                "Index Name": "users_pkey",
                "Total Cost": 8.3,
                "Plan Rows": 1
            }
        }]);

        let (_, scans) = inspect(&plan, "fp").unwrap();
        assert!(scans.is_empty());
    }

    #[test]
    fn missing_plan_is_unparseable() {
        let err = inspect(&json!([{ "Execution Time": 1.0 }]), "fp").unwrap_err();
        assert!(matches!(err, Error::PlanUnparseable { .. }));
        assert_eq!(err.stage(), "plan");
    }

    #[test]
    fn missing_total_cost_is_unparseable() {
        let plan = json!([{ "Plan": { "Node Type": "Result", "Plan Rows": 1 } }]);
        assert!(inspect(&plan, "fp").is_err());
    }

    #[test]
    fn expression_outputs_are_dropped() {
        let plan = json!([{
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "t",
                "Total Cost": 10.0,
                "Plan Rows": 5,
                "Output": ["t.k", "lower(t.name)", "(t.a + 1)"]
            }
        }]);

        let (_, scans) = inspect(&plan, "fp").unwrap();
        assert_eq!(
            scans[0].output_columns.as_deref(),
            Some(["k".to_string()].as_slice())
        );
    }
}
