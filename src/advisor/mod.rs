//! Recommendation pipeline
//!
//! `IndexAdvisor` composes the analyser, the gateway, and the statistics
//! provider into the public `analyse` operation. The `recommend` function
//! holds the pure-ish core of the pipeline and talks to statistics only
//! through the `CatalogSource` trait, which is what makes the whole
//! recommendation path testable without a database.

mod candidate;
mod proposal;
mod selectivity;

pub use proposal::Proposal;

use crate::analyzer::{self, ParsedQuery, PredicateRole};
use crate::config::{AdvisorConfig, Config, ConfigError};
use crate::error::{Error, Result, statement_fingerprint};
use crate::gateway::Gateway;
use crate::plan::{self, PlanMetrics, ScanRecord};
use crate::stats::{CatalogSource, ColumnStats, StatsProvider, TableHealth};
use candidate::Candidate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Everything one pass produces.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub metrics: PlanMetrics,
    pub scans: Vec<ScanRecord>,
    /// Ranked best-first. Empty when the plan has no sequential scans or no
    /// scan has candidate columns.
    pub proposals: Vec<Proposal>,
}

/// The index-recommendation engine. Cheap to clone; clones share the
/// connection pool and the statistics caches, so concurrent passes are
/// bounded by the pool.
#[derive(Clone)]
pub struct IndexAdvisor {
    gateway: Gateway,
    stats: StatsProvider,
    config: Arc<Config>,
}

impl IndexAdvisor {
    /// Validate the configuration and open the connection pool.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let url = config.database.url.clone().ok_or_else(|| {
            Error::Config(ConfigError::Validation(
                "database.url is not set".to_string(),
            ))
        })?;
        let gateway = Gateway::connect(&url, &config).await?;
        let stats = StatsProvider::new(gateway.clone(), &config);
        Ok(Self {
            gateway,
            stats,
            config: Arc::new(config),
        })
    }

    /// Analyse one statement: parse it, explain it, and rank index
    /// proposals for every sequential scan in the plan.
    ///
    /// The future is cancel-safe: dropping it abandons outstanding database
    /// work and no partial result escapes.
    pub async fn analyse(&self, sql: &str) -> Result<Analysis> {
        let fingerprint = statement_fingerprint(sql);
        debug!(statement = %fingerprint, "analysing statement");

        let parsed = analyzer::parse_statement(sql)?;
        let document = self
            .gateway
            .run_explain(
                sql,
                self.config.explain.analyze,
                self.config.explain.timeout_ms,
            )
            .await?;
        let (metrics, scans) = plan::inspect(&document, &fingerprint)?;
        let proposals = recommend(
            &parsed,
            &scans,
            &metrics,
            &self.stats,
            &self.config.advisor,
        )
        .await;

        debug!(
            statement = %fingerprint,
            scans = scans.len(),
            proposals = proposals.len(),
            "analysis complete"
        );
        Ok(Analysis {
            metrics,
            scans,
            proposals,
        })
    }

    /// Plan-only mode: explain the statement and report its scans without
    /// generating proposals. This is the degraded path for statements the
    /// analyser cannot model.
    pub async fn inspect(&self, sql: &str) -> Result<Analysis> {
        let fingerprint = statement_fingerprint(sql);
        let document = self
            .gateway
            .run_explain(
                sql,
                self.config.explain.analyze,
                self.config.explain.timeout_ms,
            )
            .await?;
        let (metrics, scans) = plan::inspect(&document, &fingerprint)?;
        Ok(Analysis {
            metrics,
            scans,
            proposals: Vec::new(),
        })
    }

    /// Analyse the most expensive recorded statements, at most
    /// `max_workers_per_batch` at a time. Statements that fail to analyse
    /// are logged and skipped; the result keeps the ranking order of the
    /// statement source.
    pub async fn analyse_top(&self, limit: i64, min_calls: i64) -> Result<Vec<(String, Analysis)>> {
        let statements = self.gateway.fetch_top_statements(limit, min_calls).await?;
        let semaphore = Arc::new(Semaphore::new(self.config.advisor.max_workers_per_batch));
        let mut tasks: JoinSet<(usize, String, Result<Analysis>)> = JoinSet::new();

        for (position, sql) in statements.into_iter().enumerate() {
            let advisor = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    // The semaphore lives as long as the task set; closure
                    // here means the batch is being torn down.
                    return (
                        position,
                        sql,
                        Err(Error::Config(ConfigError::Validation(
                            "batch cancelled".to_string(),
                        ))),
                    );
                };
                let outcome = advisor.analyse(&sql).await;
                (position, sql, outcome)
            });
        }

        let mut completed: Vec<(usize, String, Analysis)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((position, sql, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(analysis) => completed.push((position, sql, analysis)),
                Err(error) => {
                    warn!(stage = error.stage(), %error, "batch statement skipped")
                }
            }
        }

        completed.sort_by_key(|(position, ..)| *position);
        Ok(completed
            .into_iter()
            .map(|(_, sql, analysis)| (sql, analysis))
            .collect())
    }

    /// Release every pooled connection. The advisor is unusable afterwards.
    pub async fn close(&self) {
        self.gateway.close().await;
    }
}

/// Rank index proposals for the given scans.
///
/// One composite proposal per scan; duplicates across scans collapse by
/// `(table, columns, predicate, includes)`, keeping the higher prediction.
/// Statistics failures downgrade the affected column instead of aborting.
pub async fn recommend<S: CatalogSource>(
    parsed: &ParsedQuery,
    scans: &[ScanRecord],
    metrics: &PlanMetrics,
    source: &S,
    options: &AdvisorConfig,
) -> Vec<Proposal> {
    let mut proposals: Vec<Proposal> = Vec::new();
    let mut by_key: HashMap<(String, Vec<String>, Option<String>, Vec<String>), usize> =
        HashMap::new();
    let mut health_cache: BTreeMap<String, TableHealth> = BTreeMap::new();

    for scan in scans {
        let Some(proposal) =
            propose_for_scan(parsed, scan, metrics, source, options, &mut health_cache).await
        else {
            continue;
        };

        match by_key.get(&proposal.dedup_key()) {
            Some(&existing) => {
                if proposal.improvement > proposals[existing].improvement {
                    proposals[existing] = proposal;
                }
            }
            None => {
                by_key.insert(proposal.dedup_key(), proposals.len());
                proposals.push(proposal);
            }
        }
    }

    // Stable: equal predictions keep scan order.
    proposals.sort_by(|a, b| b.improvement.total_cmp(&a.improvement));
    proposals
}

async fn propose_for_scan<S: CatalogSource>(
    parsed: &ParsedQuery,
    scan: &ScanRecord,
    metrics: &PlanMetrics,
    source: &S,
    options: &AdvisorConfig,
    health_cache: &mut BTreeMap<String, TableHealth>,
) -> Option<Proposal> {
    let names = parsed.candidates_for(&scan.table);
    if names.is_empty() {
        debug!(table = %scan.table, "scan has no candidate columns");
        return None;
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    for name in names {
        let (role, stats) = match source.column_stats(&scan.table, &name).await {
            Ok(stats) => (parsed.role_of(&name), stats),
            Err(error) => {
                // One bad column must not sink the pass: demote it to a
                // generic predicate with neutral statistics.
                warn!(table = %scan.table, column = %name, %error, "statistics unavailable, downgrading column");
                (PredicateRole::Other, ColumnStats::fallback())
            }
        };

        // A single-valued column discriminates nothing.
        if stats.distinct <= 1.0 {
            debug!(table = %scan.table, column = %name, "dropping single-valued column");
            continue;
        }

        candidates.push(Candidate {
            name: name.clone(),
            role,
            base_selectivity: selectivity::base_selectivity(role, &stats),
            correlation: stats.correlation,
            literal: parsed.equality_literals.get(&name).cloned(),
        });
    }

    // Without a single predicate column the index would lead on a sort-only
    // column and could not cut the scan's filter cost.
    if candidates
        .iter()
        .all(|c| c.role == PredicateRole::OrderBy)
    {
        return None;
    }

    candidate::order_candidates(&mut candidates);

    let bases: Vec<f64> = candidates.iter().map(|c| c.base_selectivity).collect();
    let observed = selectivity::observed_selectivity(scan);
    let composite = selectivity::composite_selectivity(&bases, observed);
    let mut improvement = selectivity::improvement(composite, candidates[0].correlation);

    let roles: BTreeMap<String, PredicateRole> = candidates
        .iter()
        .map(|c| (c.name.clone(), c.role))
        .collect();

    let (indexed, filter_predicate) = candidate::split_partial(candidates, options.partial_enabled);
    let columns: Vec<String> = indexed.into_iter().map(|c| c.name).collect();

    let include_columns = candidate::covering_includes(scan, &columns, options);
    if !include_columns.is_empty() {
        improvement = selectivity::apply_covering_boost(improvement);
    }

    let health = match health_cache.get(&scan.table) {
        Some(health) => *health,
        None => {
            let health = match source.table_health(&scan.table).await {
                Ok(health) => health,
                Err(error) => {
                    debug!(table = %scan.table, %error, "table health unavailable, assuming quiet table");
                    TableHealth::default()
                }
            };
            health_cache.insert(scan.table.clone(), health);
            health
        }
    };
    let warning = candidate::over_indexing_warning(&scan.table, &health);

    let name = index_name_for(scan, &columns, &filter_predicate, &include_columns);
    let ddl = proposal::render_ddl(
        &name,
        &scan.table,
        &columns,
        &include_columns,
        filter_predicate.as_deref(),
    );
    let rationale = build_rationale(scan, metrics, composite, improvement);

    Some(Proposal {
        table: scan.table.clone(),
        columns,
        filter_predicate,
        include_columns,
        roles,
        improvement,
        rationale,
        warning,
        ddl,
    })
}

fn index_name_for(
    scan: &ScanRecord,
    columns: &[String],
    filter_predicate: &Option<String>,
    include_columns: &[String],
) -> String {
    proposal::index_name(
        &scan.table,
        columns,
        filter_predicate.is_some(),
        !include_columns.is_empty(),
    )
}

fn build_rationale(
    scan: &ScanRecord,
    metrics: &PlanMetrics,
    composite: f64,
    improvement: f64,
) -> String {
    let share = if metrics.total_cost > 0.0 {
        (scan.total_cost / metrics.total_cost * 100.0).min(100.0)
    } else {
        100.0
    };
    format!(
        "sequential scan on {} costs {:.2} ({:.0}% of the plan) and removes {} rows by filter; \
         candidate selectivity {:.6} predicts a {:.0}% cost reduction",
        scan.table,
        scan.total_cost,
        share,
        scan.rows_removed,
        composite,
        improvement * 100.0
    )
}
