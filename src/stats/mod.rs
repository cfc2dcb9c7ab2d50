//! Column statistics and table health
//!
//! Wraps the gateway's catalog lookups behind the `CatalogSource` trait and
//! a pair of TTL caches. The recommender only ever talks to the trait, so
//! tests can substitute a fixture source.

use crate::config::Config;
use crate::error::Result;
use crate::gateway::Gateway;
use moka::future::Cache;
use serde::Serialize;
use tracing::debug;

/// Distinct-value count assumed when the catalog has nothing to say.
const FALLBACK_DISTINCT: f64 = 100.0;

/// Conservative table size assumed when reltuples is missing or the table
/// was never analysed (`reltuples = -1` since PostgreSQL 13).
const FALLBACK_ROW_COUNT: f64 = 10_000.0;

/// Distribution statistics for one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnStats {
    /// Absolute distinct-value count, at least 1, at most `row_count`.
    pub distinct: f64,
    /// Fraction of rows that are null, in [0, 1].
    pub null_frac: f64,
    /// Physical/logical order correlation, in [-1, 1].
    pub correlation: f64,
    /// Live rows in the table.
    pub row_count: f64,
}

impl ColumnStats {
    /// Resolve raw catalog numbers into bounded statistics.
    ///
    /// The catalog reports `n_distinct < 0` as a fraction of the row count;
    /// zero means the value was absent. Row counts of zero or -1 mean the
    /// table was never analysed and fall back to a conservative size.
    pub fn from_catalog(n_distinct: f64, null_frac: f64, correlation: f64, row_count: f64) -> Self {
        let rows = if row_count > 0.0 {
            row_count
        } else {
            FALLBACK_ROW_COUNT
        };
        let raw = if n_distinct < 0.0 {
            -n_distinct * rows
        } else if n_distinct == 0.0 {
            FALLBACK_DISTINCT
        } else {
            n_distinct
        };
        Self {
            distinct: raw.clamp(1.0, rows),
            null_frac: null_frac.clamp(0.0, 1.0),
            correlation: correlation.clamp(-1.0, 1.0),
            row_count: rows,
        }
    }

    /// Statistics used when the catalog has no entry for the column.
    pub fn fallback() -> Self {
        Self {
            distinct: FALLBACK_DISTINCT,
            null_frac: 0.0,
            correlation: 0.0,
            row_count: FALLBACK_ROW_COUNT,
        }
    }
}

/// Index count and write activity for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TableHealth {
    pub index_count: u32,
    /// Fraction of row operations that are writes, in [0, 1].
    pub write_ratio: f64,
}

/// Source of catalog-derived statistics. The production implementation is
/// `StatsProvider`; tests use an in-memory fixture.
pub trait CatalogSource: Send + Sync {
    fn column_stats(
        &self,
        table: &str,
        column: &str,
    ) -> impl Future<Output = Result<ColumnStats>> + Send;

    fn table_health(&self, table: &str) -> impl Future<Output = Result<TableHealth>> + Send;
}

/// Caching statistics provider backed by the gateway.
///
/// Both caches are process-wide per advisor instance and expire entries
/// after the configured TTL. Concurrent lookups of the same key may race;
/// both resolve to equivalent values, so the last writer winning is benign.
#[derive(Clone)]
pub struct StatsProvider {
    gateway: Gateway,
    columns: Cache<(String, String), ColumnStats>,
    tables: Cache<String, TableHealth>,
}

impl StatsProvider {
    pub fn new(gateway: Gateway, config: &Config) -> Self {
        let ttl = config.cache.ttl();
        Self {
            gateway,
            columns: Cache::builder()
                .max_capacity(16_384)
                .time_to_live(ttl)
                .build(),
            tables: Cache::builder()
                .max_capacity(4_096)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl CatalogSource for StatsProvider {
    fn column_stats(
        &self,
        table: &str,
        column: &str,
    ) -> impl Future<Output = Result<ColumnStats>> + Send {
        async move {
            let key = (table.to_string(), column.to_string());
            if let Some(hit) = self.columns.get(&key).await {
                return Ok(hit);
            }
            let stats = self.gateway.fetch_column_stats(table, column).await?;
            debug!(table, column, distinct = stats.distinct, "cached column statistics");
            self.columns.insert(key, stats).await;
            Ok(stats)
        }
    }

    fn table_health(&self, table: &str) -> impl Future<Output = Result<TableHealth>> + Send {
        async move {
            if let Some(hit) = self.tables.get(table).await {
                return Ok(hit);
            }
            let health = self.gateway.fetch_table_health(table).await?;
            self.tables.insert(table.to_string(), health).await;
            Ok(health)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_n_distinct_resolves_to_fraction_of_rows() {
        let stats = ColumnStats::from_catalog(-0.5, 0.0, 0.2, 1_000_000.0);
        assert_eq!(stats.distinct, 500_000.0);
        assert_eq!(stats.row_count, 1_000_000.0);
    }

    #[test]
    fn distinct_is_bounded_by_row_count() {
        let stats = ColumnStats::from_catalog(5_000.0, 0.0, 0.0, 100.0);
        assert_eq!(stats.distinct, 100.0);

        let stats = ColumnStats::from_catalog(-3.0, 0.0, 0.0, 100.0);
        assert_eq!(stats.distinct, 100.0);
    }

    #[test]
    fn distinct_has_floor_of_one() {
        let stats = ColumnStats::from_catalog(0.5, 0.0, 0.0, 100.0);
        assert!(stats.distinct >= 1.0);
    }

    #[test]
    fn unanalysed_table_uses_conservative_row_count() {
        let stats = ColumnStats::from_catalog(50.0, 0.0, 0.0, -1.0);
        assert_eq!(stats.row_count, 10_000.0);
        assert_eq!(stats.distinct, 50.0);
    }

    #[test]
    fn out_of_range_fractions_are_clamped() {
        let stats = ColumnStats::from_catalog(10.0, 1.5, -2.0, 100.0);
        assert_eq!(stats.null_frac, 1.0);
        assert_eq!(stats.correlation, -1.0);
    }

    #[test]
    fn fallback_matches_contract() {
        let stats = ColumnStats::fallback();
        assert_eq!(stats.distinct, 100.0);
        assert_eq!(stats.null_frac, 0.0);
        assert_eq!(stats.correlation, 0.0);
        assert_eq!(stats.row_count, 10_000.0);
    }

    #[test]
    fn default_health_is_quiet() {
        let health = TableHealth::default();
        assert_eq!(health.index_count, 0);
        assert_eq!(health.write_ratio, 0.0);
    }
}
