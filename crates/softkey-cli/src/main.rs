use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use softkey_catalog::{Connector, PostgresConnector};
use softkey_core::{Config, ConnectionConfig, RowLimit, ScanReport};
use softkey_engine::{
    FileLedgerStore, LedgerKey, PairCriterion, PairOutcome, ProgressLedger, ScanObserver, Scanner,
    StageRunError, TableRef,
};

const DEFAULT_CONFIG: &str = "softkey.toml";

/// SoftKey - Soft foreign key inference for legacy schemas
#[derive(Parser)]
#[command(name = "softkey")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: softkey.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Infer soft foreign keys, from coarse row limits to full scans
    Scan {
        /// Row limits to run, in order (e.g. 10,50,none)
        #[arg(short, long, value_delimiter = ',')]
        stages: Option<Vec<RowLimit>>,

        /// Minimum overlap ratio for a match
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Checkpoint file
        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,

        /// Also output markdown report
        #[arg(short, long)]
        markdown: Option<PathBuf>,

        /// Source tables processed at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },

    /// Show checkpointed tables for the configured connection
    Status {
        /// Checkpoint file
        #[arg(short, long)]
        ledger: Option<PathBuf>,
    },

    /// Forget checkpoints so the next scan starts over
    Reset {
        /// Clear every key of this connection, not only the configured stages
        #[arg(long)]
        all: bool,

        /// Checkpoint file
        #[arg(short, long)]
        ledger: Option<PathBuf>,
    },

    /// Compare one table with another, possibly in a different database
    Compare {
        /// Table in the configured database
        left_table: String,

        /// Table to compare against
        right_table: String,

        /// Config file whose connection holds the right-hand table
        #[arg(long)]
        right_config: Option<PathBuf>,

        /// Database on the same server holding the right-hand table
        #[arg(long, conflicts_with = "right_config")]
        right_database: Option<String>,

        /// Distinct values two columns must share (default: 5)
        #[arg(long, conflicts_with = "threshold")]
        min_common: Option<usize>,

        /// Match on overlap ratio instead of a shared-value count
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Row limit applied to both tables
        #[arg(short, long, default_value = "none")]
        limit: RowLimit,

        /// Write the result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Connect and run a trivial query
    TestConnection,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.verbose)?;
    tracing::info!(connection = %config.connection.identity(), "SoftKey starting");

    if cli.verbose {
        eprintln!(
            "{} {} ({})",
            "Using connection".cyan(),
            config.connection.identity(),
            config.connection.schema
        );
    }

    match cli.command {
        Commands::Scan {
            stages,
            threshold,
            ledger,
            output,
            markdown,
            concurrency,
        } => {
            let mut config = config;
            if let Some(stages) = stages {
                config.scan.stages = stages;
            }
            if let Some(threshold) = threshold {
                config.scan.threshold = threshold;
            }
            if let Some(ledger) = ledger {
                config.scan.ledger = ledger;
            }
            if let Some(concurrency) = concurrency {
                config.scan.concurrency = concurrency;
            }
            config.validate()?;

            scan_command(&config, &output, markdown.as_deref(), cli.verbose).await
        }
        Commands::Status { ledger } => status_command(&with_ledger(config, ledger), cli.verbose),
        Commands::Reset { all, ledger } => reset_command(&with_ledger(config, ledger), all),
        Commands::Compare {
            left_table,
            right_table,
            right_config,
            right_database,
            min_common,
            threshold,
            limit,
            output,
        } => {
            let criterion = pair_criterion(min_common, threshold)?;
            let right = match (right_config, right_database) {
                (Some(path), _) => load_config(Some(path.as_path()), cli.verbose)?.connection,
                (None, Some(database)) => ConnectionConfig {
                    database,
                    ..config.connection.clone()
                },
                (None, None) => config.connection.clone(),
            };

            compare_command(
                TableRef::new(&config.connection, &left_table),
                TableRef::new(&right, &right_table),
                criterion,
                limit,
                output.as_deref(),
            )
            .await
        }
        Commands::TestConnection => test_connection_command(&config).await,
    }
}

/// Log to stderr; `--verbose` forces debug, otherwise `RUST_LOG` (default warn)
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Config file if given or present, otherwise the libpq environment
fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    if let Some(path) = path {
        tracing::debug!(path = %path.display(), "loading config");
        return Config::from_file(path).with_context(|| format!("loading {}", path.display()));
    }

    let default = Path::new(DEFAULT_CONFIG);
    if default.exists() {
        tracing::debug!(path = DEFAULT_CONFIG, "loading config");
        return Ok(Config::from_file(default)?);
    }

    tracing::debug!("no config file, reading PG* environment");

    if verbose {
        eprintln!("{}", "No config file found, using PG* environment".yellow());
    }
    let connection = connection_from_env().ok_or_else(|| {
        anyhow::anyhow!(
            "No {} found. Create one or set PGHOST, PGDATABASE and PGUSER.",
            DEFAULT_CONFIG
        )
    })?;
    let config = Config::new(connection);
    config.validate()?;
    Ok(config)
}

fn connection_from_env() -> Option<ConnectionConfig> {
    let host = std::env::var("PGHOST").ok()?;
    let database = std::env::var("PGDATABASE").ok()?;
    let user = std::env::var("PGUSER").ok()?;

    let mut connection = ConnectionConfig::new(host, database, user);
    if let Some(port) = std::env::var("PGPORT").ok().and_then(|p| p.parse().ok()) {
        connection = connection.with_port(port);
    }
    Some(connection)
}

fn with_ledger(mut config: Config, ledger: Option<PathBuf>) -> Config {
    if let Some(ledger) = ledger {
        config.scan.ledger = ledger;
    }
    config
}

/// Scan command - run every configured stage and write the report
async fn scan_command(config: &Config, output: &Path, markdown: Option<&Path>, verbose: bool) -> Result<()> {
    let ledger_path = config.ledger_path();
    let store = FileLedgerStore::new(&ledger_path);

    if verbose {
        eprintln!("{} {}", "Checkpointing to:".cyan(), ledger_path.display());
    }

    let scanner = Scanner::from_config(Arc::new(PostgresConnector), &config.scan)
        .with_observer(Arc::new(ConsoleObserver));

    // Ctrl-C stops before the next table; finished tables stay checkpointed
    let cancel = scanner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, finishing tables in flight...".yellow());
            tracing::warn!("interrupt received, cancelling scan");
            cancel.cancel();
        }
    });

    let outcome = match scanner
        .staged_identify(&config.connection, &config.scan.stages, config.scan.threshold, &store)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            print_stage_failure(&e, &ledger_path);
            return Err(e.into());
        }
    };

    let report = outcome.into_report(&config.connection, config.scan.threshold);

    report.save_to_file(output)?;
    tracing::info!(path = %output.display(), links = report.summary.links, "report written");
    eprintln!("{} {}", "Report saved to:".green(), output.display());

    if let Some(md_path) = markdown {
        std::fs::write(md_path, report.to_markdown())?;
        tracing::info!(path = %md_path.display(), "markdown report written");
        eprintln!("{} {}", "Markdown report saved to:".green(), md_path.display());
    }

    print_summary(&report);
    Ok(())
}

/// Status command - list checkpointed tables per ledger key
fn status_command(config: &Config, verbose: bool) -> Result<()> {
    let ledger_path = config.ledger_path();
    let store = FileLedgerStore::new(&ledger_path);
    let ledger = ProgressLedger::load(&store)?;

    let keys: Vec<&LedgerKey> = ledger
        .keys()
        .filter(|key| key.belongs_to(&config.connection))
        .collect();

    println!("{} {}", "Ledger:".bold(), ledger_path.display());
    if keys.is_empty() {
        println!("No checkpoints for {}", config.connection.identity());
        return Ok(());
    }

    for key in keys {
        println!("  {} {} tables complete", key.to_string().cyan(), ledger.completed_count(key));
        if verbose {
            for (table, done) in ledger.entries(key) {
                if done {
                    println!("    {} {}", "✓".green(), table);
                }
            }
        }
    }
    Ok(())
}

/// Reset command - clear checkpoints of the configured connection
fn reset_command(config: &Config, all: bool) -> Result<()> {
    let ledger_path = config.ledger_path();
    let store = FileLedgerStore::new(&ledger_path);
    let mut ledger = ProgressLedger::load(&store)?;

    let keys: Vec<LedgerKey> = if all {
        ledger
            .keys()
            .filter(|key| key.belongs_to(&config.connection))
            .cloned()
            .collect()
    } else {
        let scope = config.scan.ledger_scope;
        let mut keys: Vec<LedgerKey> = config
            .scan
            .stages
            .iter()
            .map(|&limit| LedgerKey::for_stage(&config.connection, scope, limit))
            .collect();
        keys.dedup();
        keys
    };

    let mut cleared = 0;
    for key in &keys {
        cleared += ledger.reset(key)?;
    }

    println!(
        "{} {} checkpointed tables across {} keys",
        "Cleared".green(),
        cleared,
        keys.len()
    );
    Ok(())
}

fn pair_criterion(min_common: Option<usize>, threshold: Option<f64>) -> Result<PairCriterion> {
    match (min_common, threshold) {
        (Some(0), _) => anyhow::bail!("--min-common must be at least 1"),
        (Some(n), _) => Ok(PairCriterion::CommonValues(n)),
        (None, Some(t)) if !(t > 0.0 && t <= 1.0) => {
            anyhow::bail!("--threshold must be in (0, 1], got {}", t)
        }
        (None, Some(t)) => Ok(PairCriterion::Ratio(t)),
        (None, None) => Ok(PairCriterion::default()),
    }
}

/// Compare command - one table pair, no ledger
async fn compare_command(
    left: TableRef<'_>,
    right: TableRef<'_>,
    criterion: PairCriterion,
    limit: RowLimit,
    output: Option<&Path>,
) -> Result<()> {
    let scanner = Scanner::new(Arc::new(PostgresConnector)).with_observer(Arc::new(ConsoleObserver));

    eprintln!(
        "{} {}.{} {} {}.{} ({}, row limit {})",
        "Comparing".cyan(),
        left.connection.database,
        left.table,
        "with".cyan(),
        right.connection.database,
        right.table,
        criterion,
        limit
    );

    let outcome = scanner.compare_tables(left, right, criterion, limit).await?;

    if let Some(path) = output {
        std::fs::write(path, outcome.to_json()?)?;
        tracing::info!(path = %path.display(), "pair result written");
        eprintln!("{} {}", "Result saved to:".green(), path.display());
    }

    print_pair_summary(&outcome);
    Ok(())
}

/// Test connection command
async fn test_connection_command(config: &Config) -> Result<()> {
    eprintln!("{} {}...", "Connecting to".cyan(), config.connection.identity());

    let adapter = PostgresConnector.connect(&config.connection).await?;
    adapter.test_connection().await?;
    let tables = adapter.list_tables().await?;

    println!(
        "{} {} ({} tables in schema '{}')",
        "✓ Connection successful:".green(),
        adapter.name(),
        tables.len(),
        config.connection.schema
    );
    Ok(())
}

fn print_stage_failure(error: &StageRunError, ledger_path: &Path) {
    eprintln!();
    eprintln!("{} {}", "✗".red().bold(), error);
    match error.checkpointed() {
        Some(n) => eprintln!(
            "  {} tables checkpointed under '{}' in {}; rerun to resume.",
            n,
            error.key,
            ledger_path.display()
        ),
        None => eprintln!("  Checkpoints in {} are unchanged.", ledger_path.display()),
    }
    if !error.completed.stages.is_empty() {
        eprintln!("  {} earlier stages completed.", error.completed.stages.len());
    }
}

fn print_summary(report: &ScanReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Soft Foreign Key Scan".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Connection: {}", report.connection);
    println!("Threshold:  {}", report.threshold);
    println!();

    println!("{}", "Stages:".bold());
    for stage in &report.stages {
        println!(
            "  limit {:>9}: {} processed, {} resumed, {} matched",
            stage.row_limit.to_string(),
            stage.tables_processed,
            stage.tables_resumed,
            stage.tables_matched
        );
        if !stage.tables_failed.is_empty() {
            println!("    {} {}", "skipped:".yellow(), stage.tables_failed.join(", "));
        }
    }
    println!();

    if report.matches.is_empty() {
        println!("{}", "No soft foreign keys found".yellow());
    } else {
        println!(
            "{} ({} source tables, {} links)",
            "Matches:".bold(),
            report.summary.source_tables,
            report.summary.links
        );
        for (source, candidates) in report.matches.iter() {
            for (table, columns) in candidates.iter() {
                println!("  {} -> {}.{}", source.green(), table, columns.join(", "));
            }
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

fn print_pair_summary(outcome: &PairOutcome) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Pairwise Comparison".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Left:      {}", outcome.left);
    println!("Right:     {}", outcome.right);
    println!("Criterion: {}", outcome.criterion);
    println!("Compared:  {} column pairs", outcome.compared);
    println!();

    if outcome.matches.is_empty() {
        println!("{}", "No soft foreign keys found".yellow());
    } else {
        println!("{}", "Matches:".bold());
        for m in &outcome.matches {
            println!(
                "  {} -> {} ({} common, ratio {:.2})",
                m.left_column.green(),
                m.right_column,
                m.common_values,
                m.ratio
            );
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

/// Prints scan progress to stderr
struct ConsoleObserver;

impl ScanObserver for ConsoleObserver {
    fn stage_started(&self, limit: RowLimit) {
        eprintln!("{} {}", "Running stage with row limit =".blue(), limit);
    }

    fn table_skipped(&self, table: &str) {
        eprintln!("  {}", format!("Skipping {}, already done.", table).yellow());
    }

    fn table_started(&self, table: &str) {
        eprintln!("  {} {}...", "Processing table".green(), table);
    }

    fn table_failed(&self, table: &str, reason: &str) {
        eprintln!("  {} {}: {}", "⚠ Skipping".yellow(), table, reason);
    }

    fn table_finished(&self, table: &str, done: usize, total: usize) {
        eprintln!("  {} {} [{}/{}]", "✓".green(), table, done, total);
    }

    fn connection_failed(&self, reason: &str) {
        eprintln!("{} {}", "✗ Connection failed:".red(), reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::parse_from([
            "softkey", "scan", "--stages", "10,50,none", "--threshold", "0.2", "-j", "4",
        ]);

        match cli.command {
            Commands::Scan {
                stages,
                threshold,
                concurrency,
                output,
                ..
            } => {
                assert_eq!(
                    stages,
                    Some(vec![RowLimit::Limited(10), RowLimit::Limited(50), RowLimit::Unbounded])
                );
                assert_eq!(threshold, Some(0.2));
                assert_eq!(concurrency, Some(4));
                assert_eq!(output, PathBuf::from("report.json"));
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_zero_stage_rejected() {
        let result = Cli::try_parse_from(["softkey", "scan", "--stages", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_compare_arguments() {
        let cli = Cli::parse_from([
            "softkey", "compare", "invoices", "accounts", "--right-database", "crm", "--limit", "100",
        ]);

        match cli.command {
            Commands::Compare {
                left_table,
                right_table,
                right_database,
                min_common,
                threshold,
                limit,
                ..
            } => {
                assert_eq!(left_table, "invoices");
                assert_eq!(right_table, "accounts");
                assert_eq!(right_database.as_deref(), Some("crm"));
                assert_eq!(limit, RowLimit::Limited(100));
                assert_eq!(
                    pair_criterion(min_common, threshold).unwrap(),
                    PairCriterion::CommonValues(5)
                );
            }
            _ => panic!("expected compare"),
        }
    }

    #[test]
    fn test_compare_criterion_flags() {
        assert!(Cli::try_parse_from([
            "softkey", "compare", "a", "b", "--min-common", "3", "--threshold", "0.5",
        ])
        .is_err());
        assert_eq!(pair_criterion(None, Some(0.5)).unwrap(), PairCriterion::Ratio(0.5));
        assert!(pair_criterion(Some(0), None).is_err());
        assert!(pair_criterion(None, Some(1.5)).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["softkey", "status", "--config", "legacy.toml", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("legacy.toml")));
    }
}
