//! Error taxonomy for the advisor
//!
//! A closed set of error kinds. Errors that surface to the caller carry the
//! offending statement's fingerprint and the pipeline stage that produced
//! them; `StatisticsUnavailable` and transient connection errors are handled
//! internally and only appear here when recovery was exhausted.

use crate::gateway::StatementClass;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The analyser could not build a syntactic tree from the statement.
    #[error("statement could not be parsed: {reason} (statement {fingerprint})")]
    UnparseableStatement { fingerprint: String, reason: String },

    /// The safety check blocked an analysed explain of a write statement.
    #[error("refusing to EXPLAIN ANALYZE a {class} statement (statement {fingerprint})")]
    RefusedMutatingExplain {
        class: StatementClass,
        fingerprint: String,
    },

    /// The explanatory call exceeded its deadline.
    #[error("EXPLAIN exceeded its {timeout_ms} ms deadline (statement {fingerprint})")]
    ExplainTimeout { timeout_ms: u64, fingerprint: String },

    /// The planner output lacked required fields.
    #[error("planner output unusable: {reason} (statement {fingerprint})")]
    PlanUnparseable { fingerprint: String, reason: String },

    /// Catalog lookup failed for a specific column. The recommender recovers
    /// from this locally by downgrading the column; it only surfaces when a
    /// caller queries the statistics provider directly.
    #[error("no statistics for {table}.{column}: {reason}")]
    StatisticsUnavailable {
        table: String,
        column: String,
        reason: String,
    },

    /// The gateway could not reach the database, even after retrying.
    #[error("database connection failed after {attempts} attempts: {source}")]
    ConnectionFailure {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// Pipeline stage that produced this error, for structured reporting.
    pub fn stage(&self) -> &'static str {
        match self {
            Error::UnparseableStatement { .. } => "analyse",
            Error::RefusedMutatingExplain { .. } => "explain",
            Error::ExplainTimeout { .. } => "explain",
            Error::PlanUnparseable { .. } => "plan",
            Error::StatisticsUnavailable { .. } => "statistics",
            Error::ConnectionFailure { .. } => "gateway",
            Error::Database(_) => "gateway",
            Error::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable fingerprint of a SQL statement, used to identify the statement in
/// errors and logs without echoing the full text.
///
/// Uses the PostgreSQL parser's fingerprint (literal- and whitespace-
/// insensitive) when the statement parses; falls back to a plain hash of the
/// raw text so that even unparseable statements are identifiable.
pub fn statement_fingerprint(sql: &str) -> String {
    match pg_query::fingerprint(sql) {
        Ok(fp) => fp.hex,
        Err(_) => {
            use std::hash::{DefaultHasher, Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            sql.hash(&mut hasher);
            format!("raw{:016x}", hasher.finish())
        }
    }
}
