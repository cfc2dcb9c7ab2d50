//! DBMS gateway
//!
//! Owns the connection pool and every statement that crosses it. The
//! gateway never mutates user data: explains of write statements are
//! refused before any connection is acquired, analysed explains run inside
//! a transaction that is always rolled back, and catalog lookups are plain
//! reads.

mod classify;
mod placeholder;

pub use classify::StatementClass;
pub use placeholder::substitute_placeholders;

use crate::config::Config;
use crate::error::{Error, Result, statement_fingerprint};
use crate::stats::{ColumnStats, TableHealth};
use sqlx::Connection as _;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row as _, pool::PoolConnection};
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Grace added on top of the server-side statement timeout before the
/// client-side deadline fires.
const DEADLINE_GRACE: Duration = Duration::from_secs(2);

const COLUMN_STATS_SQL: &str = "\
SELECT s.n_distinct::float8,
       s.null_frac::float8,
       s.correlation::float8,
       c.reltuples::float8
  FROM pg_stats s
  JOIN pg_class c ON c.relname = s.tablename
  JOIN pg_namespace n ON n.oid = c.relnamespace AND n.nspname = s.schemaname
 WHERE s.tablename = $1
   AND s.attname = $2
 LIMIT 1";

const TABLE_HEALTH_SQL: &str = "\
SELECT (SELECT count(*)
          FROM pg_indexes i
         WHERE i.schemaname = t.schemaname
           AND i.tablename = t.relname)::int8,
       COALESCE(t.n_tup_ins + t.n_tup_upd + t.n_tup_del, 0)::float8,
       (COALESCE(t.seq_tup_read, 0) + COALESCE(t.idx_tup_fetch, 0))::float8
  FROM pg_stat_user_tables t
 WHERE t.relname = $1
 LIMIT 1";

const TOP_STATEMENTS_SQL: &str = "\
SELECT query
  FROM pg_stat_statements
 WHERE calls >= $2
   AND query NOT ILIKE 'explain%'
 ORDER BY total_exec_time DESC
 LIMIT $1";

/// Read-only session to the target database.
#[derive(Clone)]
pub struct Gateway {
    pool: PgPool,
}

impl Gateway {
    /// Open the connection pool. Transient connection errors are retried
    /// with exponential backoff before giving up.
    pub async fn connect(url: &str, config: &Config) -> Result<Self> {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            let options = PgPoolOptions::new()
                .min_connections(config.pool.min_connections)
                .max_connections(config.pool.max_connections);
            match options.connect(url).await {
                Ok(pool) => {
                    debug!(
                        min = config.pool.min_connections,
                        max = config.pool.max_connections,
                        "connection pool ready"
                    );
                    return Ok(Self { pool });
                }
                Err(source) if attempt >= RETRY_ATTEMPTS => {
                    return Err(Error::ConnectionFailure {
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    warn!(attempt, error = %source, "connection attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Drain the pool. Outstanding connections are closed gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run the explanatory form of a statement and return the decoded JSON
    /// plan document.
    ///
    /// With `analyze`, the statement actually executes on the server, so
    /// only read statements are accepted and a server-side statement
    /// timeout is installed for the duration. The surrounding transaction
    /// is never committed; rollback (explicit or on drop) releases the
    /// timeout on every exit path.
    pub async fn run_explain(
        &self,
        sql: &str,
        analyze: bool,
        timeout_ms: u64,
    ) -> Result<serde_json::Value> {
        let fingerprint = statement_fingerprint(sql);
        ensure_analyzable(sql, analyze, &fingerprint)?;

        let prepared = substitute_placeholders(sql);
        let explain_sql = explain_statement(&prepared, analyze);
        debug!(statement = %fingerprint, analyze, "running explain");

        let mut conn = self.acquire().await?;
        let deadline = Duration::from_millis(timeout_ms).saturating_add(DEADLINE_GRACE);

        let run = async {
            if analyze {
                let mut tx = conn.begin().await?;
                sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
                    .execute(&mut *tx)
                    .await?;
                let row = sqlx::query(&explain_sql).fetch_one(&mut *tx).await?;
                tx.rollback().await?;
                Ok::<_, sqlx::Error>(row)
            } else {
                sqlx::query(&explain_sql).fetch_one(&mut *conn).await
            }
        };

        let row = match tokio::time::timeout(deadline, run).await {
            Ok(Ok(row)) => row,
            Ok(Err(e)) if is_statement_timeout(&e) => {
                return Err(Error::ExplainTimeout {
                    timeout_ms,
                    fingerprint,
                });
            }
            Ok(Err(e)) => return Err(Error::Database(e)),
            Err(_elapsed) => {
                return Err(Error::ExplainTimeout {
                    timeout_ms,
                    fingerprint,
                });
            }
        };

        row.try_get(0).map_err(|e| Error::PlanUnparseable {
            fingerprint,
            reason: format!("explain returned no JSON document: {e}"),
        })
    }

    /// Column-level distribution statistics from the catalog. Statement
    /// absence (table never analysed) yields the documented fallback; a
    /// failed lookup surfaces as `StatisticsUnavailable` for the caller to
    /// recover from.
    pub async fn fetch_column_stats(&self, table: &str, column: &str) -> Result<ColumnStats> {
        let mut conn = self.acquire().await?;
        let row: Option<(Option<f64>, Option<f64>, Option<f64>, Option<f64>)> =
            sqlx::query_as(COLUMN_STATS_SQL)
                .bind(table)
                .bind(column)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| Error::StatisticsUnavailable {
                    table: table.to_string(),
                    column: column.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(match row {
            Some((n_distinct, null_frac, correlation, reltuples)) => ColumnStats::from_catalog(
                n_distinct.unwrap_or(0.0),
                null_frac.unwrap_or(0.0),
                correlation.unwrap_or(0.0),
                reltuples.unwrap_or(0.0),
            ),
            None => {
                debug!(table, column, "no catalog statistics, using fallback");
                ColumnStats::fallback()
            }
        })
    }

    /// Index count and write activity for one table.
    pub async fn fetch_table_health(&self, table: &str) -> Result<TableHealth> {
        let mut conn = self.acquire().await?;
        let row: Option<(i64, f64, f64)> = sqlx::query_as(TABLE_HEALTH_SQL)
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(match row {
            Some((index_count, writes, reads)) => TableHealth {
                index_count: index_count.max(0) as u32,
                write_ratio: if writes + reads > 0.0 {
                    writes / (writes + reads)
                } else {
                    0.0
                },
            },
            None => TableHealth::default(),
        })
    }

    /// The most expensive statements from pg_stat_statements, for batch
    /// analysis. Requires the extension to be installed.
    pub async fn fetch_top_statements(&self, limit: i64, min_calls: i64) -> Result<Vec<String>> {
        let mut conn = self.acquire().await?;
        let statements = sqlx::query_scalar(TOP_STATEMENTS_SQL)
            .bind(limit)
            .bind(min_calls)
            .fetch_all(&mut *conn)
            .await?;
        Ok(statements)
    }

    async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match self.pool.acquire().await {
                Ok(conn) => return Ok(conn),
                Err(source) if attempt >= RETRY_ATTEMPTS => {
                    return Err(Error::ConnectionFailure {
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    warn!(attempt, error = %source, "connection acquire failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

/// The mutating-explain safety check. Runs before any connection is
/// acquired, so a refused statement never reaches the database.
fn ensure_analyzable(sql: &str, analyze: bool, fingerprint: &str) -> Result<()> {
    if !analyze {
        return Ok(());
    }
    let class = StatementClass::of(sql);
    if class.is_read() {
        Ok(())
    } else {
        Err(Error::RefusedMutatingExplain {
            class,
            fingerprint: fingerprint.to_string(),
        })
    }
}

fn explain_statement(prepared: &str, analyze: bool) -> String {
    if analyze {
        format!("EXPLAIN (FORMAT JSON, VERBOSE TRUE, ANALYZE TRUE, TIMING TRUE) {prepared}")
    } else {
        format!("EXPLAIN (FORMAT JSON, VERBOSE TRUE) {prepared}")
    }
}

fn is_statement_timeout(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("57014"),
        _ => false,
    }
}
