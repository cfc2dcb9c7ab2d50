//! pg-index-advisor CLI
//!
//! Entry point for the command-line tool.

use anyhow::{Context, Result, bail};
use clap::Parser;
use pg_index_advisor::{Analysis, Config, IndexAdvisor};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pg-index-advisor")]
#[command(about = "Index recommendation engine for PostgreSQL query workloads", long_about = None)]
struct Args {
    /// SQL statement to analyse. Omit when using --file or --top.
    sql: Option<String>,

    /// Read the SQL statement from a file
    #[arg(long, conflicts_with = "sql")]
    file: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, default_value = "pg-index-advisor.toml")]
    config: PathBuf,

    /// Connection URL; overrides the config file
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: String,

    /// Plain EXPLAIN without executing the statement
    #[arg(long)]
    no_analyze: bool,

    /// Analyse the N most expensive statements from pg_stat_statements
    #[arg(long, conflicts_with_all = ["sql", "file"])]
    top: Option<i64>,

    /// Minimum call count for --top
    #[arg(long, default_value_t = 50)]
    min_calls: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = if args.config.exists() {
        Config::from_file(&args.config).context("Failed to load configuration")?
    } else {
        Config::default()
    };
    if let Some(url) = &args.database_url {
        config.database.url = Some(url.clone());
    }
    if args.no_analyze {
        config.explain.analyze = false;
    }

    let advisor = IndexAdvisor::connect(config)
        .await
        .context("Failed to connect to the target database")?;

    let outcome = run(&advisor, &args).await;
    advisor.close().await;
    outcome
}

async fn run(advisor: &IndexAdvisor, args: &Args) -> Result<()> {
    if let Some(limit) = args.top {
        let batch = advisor
            .analyse_top(limit, args.min_calls)
            .await
            .context("Batch analysis failed")?;
        for (sql, analysis) in &batch {
            println!("-- {}", first_line(sql));
            render(analysis, &args.format)?;
            println!();
        }
        if batch.is_empty() {
            eprintln!("No statements matched (is pg_stat_statements installed?)");
        }
        return Ok(());
    }

    let sql = match (&args.sql, &args.file) {
        (Some(sql), _) => sql.clone(),
        (None, Some(path)) => {
            std::fs::read_to_string(path).context("Failed to read SQL file")?
        }
        (None, None) => bail!("Pass a SQL statement, --file, or --top"),
    };

    let analysis = advisor.analyse(&sql).await?;
    render(&analysis, &args.format)
}

fn render(analysis: &Analysis, format: &str) -> Result<()> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(analysis)?);
        }
        "text" => {
            println!(
                "plan cost {:.2}, {} rows{}",
                analysis.metrics.total_cost,
                analysis.metrics.actual_rows,
                analysis
                    .metrics
                    .execution_ms
                    .map(|ms| format!(", executed in {ms:.1} ms"))
                    .unwrap_or_default()
            );
            for scan in &analysis.scans {
                println!(
                    "seq scan on {} (cost {:.2}, {} rows, {} removed by filter)",
                    scan.table, scan.total_cost, scan.rows_scanned, scan.rows_removed
                );
            }
            if analysis.proposals.is_empty() {
                println!("no index proposals");
            }
            for (i, proposal) in analysis.proposals.iter().enumerate() {
                println!();
                println!(
                    "#{} [{:.0}% predicted improvement] {}",
                    i + 1,
                    proposal.improvement * 100.0,
                    proposal.ddl
                );
                println!("   {}", proposal.rationale);
                if let Some(warning) = &proposal.warning {
                    println!("   warning: {warning}");
                }
            }
        }
        other => bail!("Unknown output format: {other}"),
    }
    Ok(())
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or(sql)
}
