//! Configuration file parsing
//!
//! Reads pg-index-advisor.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub explain: ExplainConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub advisor: AdvisorConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection URL for the target database. When absent, the CLI falls
    /// back to the DATABASE_URL environment variable.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Minimum pooled connections kept open.
    #[serde(default = "default_pool_min")]
    pub min_connections: u32,

    /// Maximum pooled connections; also bounds concurrent recommendation passes.
    #[serde(default = "default_pool_max")]
    pub max_connections: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: default_pool_min(),
            max_connections: default_pool_max(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExplainConfig {
    /// Deadline for a single explanatory call, in milliseconds. Also set as
    /// the session statement timeout when the statement is analysed.
    #[serde(default = "default_explain_timeout_ms")]
    pub timeout_ms: u64,

    /// Whether to run EXPLAIN ANALYZE (actual rows and timing) rather than a
    /// plain EXPLAIN. Only read statements are ever analysed.
    #[serde(default = "default_true")]
    pub analyze: bool,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_explain_timeout_ms(),
            analyze: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Time-to-live for cached column statistics and table health, in seconds.
    #[serde(default = "default_stats_ttl_s")]
    pub stats_ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stats_ttl_s: default_stats_ttl_s(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_s)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdvisorConfig {
    /// Emit INCLUDE columns when the plan projects a small column set.
    #[serde(default = "default_true")]
    pub covering_enabled: bool,

    /// Move equality-against-literal predicates into a partial-index filter.
    #[serde(default = "default_true")]
    pub partial_enabled: bool,

    /// Concurrent statements analysed by a batch pass.
    #[serde(default = "default_max_workers")]
    pub max_workers_per_batch: usize,

    /// Upper bound on INCLUDE columns per proposal.
    #[serde(default = "default_max_include_columns")]
    pub max_include_columns: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            covering_enabled: true,
            partial_enabled: true,
            max_workers_per_batch: default_max_workers(),
            max_include_columns: default_max_include_columns(),
        }
    }
}

fn default_pool_min() -> u32 {
    2
}

fn default_pool_max() -> u32 {
    10
}

fn default_explain_timeout_ms() -> u64 {
    30_000
}

fn default_stats_ttl_s() -> u64 {
    3_600
}

fn default_max_workers() -> usize {
    4
}

fn default_max_include_columns() -> usize {
    5
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.min_connections == 0 {
            return Err(ConfigError::Validation(
                "pool.min_connections must be at least 1".to_string(),
            ));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(ConfigError::Validation(format!(
                "pool.min_connections ({}) exceeds pool.max_connections ({})",
                self.pool.min_connections, self.pool.max_connections
            )));
        }
        if self.explain.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "explain.timeout_ms must be positive".to_string(),
            ));
        }
        if self.advisor.max_workers_per_batch == 0 {
            return Err(ConfigError::Validation(
                "advisor.max_workers_per_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.pool.min_connections, 2);
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.explain.timeout_ms, 30_000);
        assert!(config.explain.analyze);
        assert_eq!(config.cache.stats_ttl_s, 3_600);
        assert!(config.advisor.covering_enabled);
        assert!(config.advisor.partial_enabled);
        assert_eq!(config.advisor.max_workers_per_batch, 4);
        assert_eq!(config.advisor.max_include_columns, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pool]
max_connections = 4

[explain]
timeout_ms = 5000
analyze = false

[advisor]
covering_enabled = false
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.pool.min_connections, 2);
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.explain.timeout_ms, 5000);
        assert!(!config.explain.analyze);
        assert!(!config.advisor.covering_enabled);
        assert!(config.advisor.partial_enabled);
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let config: Config = toml::from_str(
            r#"
[pool]
min_connections = 8
max_connections = 4
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config: Config = toml::from_str(
            r#"
[explain]
timeout_ms = 0
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
