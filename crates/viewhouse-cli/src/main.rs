//! viewctl - Viewhouse Command-Line Tool
//!
//! Drives a single-node viewhouse deployment:
//!
//! ```bash
//! # Build or refresh materialized views from a definitions file
//! viewctl build --lake ./lake --mvs ./mvs --views ./views.json
//!
//! # Execute a directory of JSON queries in batches
//! viewctl run --lake ./lake --mvs ./mvs --queries ./queries --out ./results
//!
//! # Cross-check views against the base lake and audit data quality
//! viewctl validate --lake ./lake --mvs ./mvs --queries ./queries
//!
//! # Show registry health
//! viewctl status --mvs ./mvs
//! ```
//!
//! Configuration precedence: flags, then `VIEWHOUSE_*` environment
//! variables, then defaults (threads = available parallelism, memory
//! budget = 4 GiB, batch size = 20, sampling rate = 10%).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use viewhouse_builder::{ViewBuilder, ViewDefinition};
use viewhouse_catalog::Registry;
use viewhouse_core::config::parse_size;
use viewhouse_core::{QuerySpec, RuntimeConfig};
use viewhouse_executor::BatchExecutor;
use viewhouse_lake::{Lake, LakeManifest};
use viewhouse_validate::Validator;

#[derive(Parser)]
#[command(name = "viewctl")]
#[command(about = "Viewhouse query acceleration engine", long_about = None)]
struct Cli {
    /// Engine worker threads
    #[arg(long, env = "VIEWHOUSE_THREADS")]
    threads: Option<usize>,

    /// Per-batch memory budget, e.g. "4GB"
    #[arg(long, env = "VIEWHOUSE_MEMORY_LIMIT")]
    memory_limit: Option<String>,

    /// Sampling rate for approximate scans, 0 < r <= 1
    #[arg(long, env = "VIEWHOUSE_SAMPLING_RATE")]
    sampling_rate: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh materialized views
    Build {
        #[arg(long)]
        lake: PathBuf,
        #[arg(long)]
        mvs: PathBuf,
        /// JSON array of view definitions
        #[arg(long)]
        views: PathBuf,
        /// Build report output path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Skip the post-build checksum audit
        #[arg(long)]
        no_audit: bool,
    },
    /// Execute a directory of JSON query files
    Run {
        #[arg(long)]
        lake: PathBuf,
        #[arg(long)]
        mvs: PathBuf,
        /// Directory of *.json query files
        #[arg(long)]
        queries: PathBuf,
        /// Output directory for CSVs, sidecars, and reports
        #[arg(long)]
        out: PathBuf,
    },
    /// Replay queries against views and base, audit data quality
    Validate {
        #[arg(long)]
        lake: PathBuf,
        #[arg(long)]
        mvs: PathBuf,
        /// Optional replay suite directory
        #[arg(long)]
        queries: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print registry health
    Status {
        #[arg(long)]
        mvs: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    viewhouse_observability::init_metrics();

    let cli = Cli::parse();
    let config = runtime_config(&cli)?;

    match cli.command {
        Commands::Build {
            lake,
            mvs,
            views,
            report,
            no_audit,
        } => build(&config, &lake, &mvs, &views, report.as_deref(), no_audit).await,
        Commands::Run {
            lake,
            mvs,
            queries,
            out,
        } => run(&config, &lake, &mvs, &queries, &out).await,
        Commands::Validate {
            lake,
            mvs,
            queries,
            report,
        } => validate(&config, &lake, &mvs, queries.as_deref(), report.as_deref()),
        Commands::Status { mvs } => status(&mvs),
    }
}

fn runtime_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(limit) = &cli.memory_limit {
        config.memory_limit_bytes = parse_size(limit)?;
    }
    if let Some(rate) = cli.sampling_rate {
        config.sampling_rate = rate;
    }
    config.validate()?;
    Ok(config)
}

async fn build(
    config: &RuntimeConfig,
    lake_root: &Path,
    mvs_root: &Path,
    views: &Path,
    report_path: Option<&Path>,
    no_audit: bool,
) -> Result<()> {
    let lake = Lake::open(lake_root)?;
    LakeManifest::from_lake(&lake).write(lake_root)?;
    let registry = Arc::new(Registry::open(mvs_root)?);
    let definitions = ViewDefinition::load_all(views)
        .with_context(|| format!("loading view definitions from {}", views.display()))?;
    if definitions.is_empty() {
        bail!("no view definitions in {}", views.display());
    }

    let builder = ViewBuilder::new(mvs_root, config, Arc::clone(&registry));
    let stale = builder.refresh_stale(&lake);
    if !stale.is_empty() {
        info!(views = ?stale, "stale views will be rebuilt");
    }

    let report = builder.build_all(definitions, &lake).await;
    for entry in &report.entries {
        match &entry.error {
            None => info!(
                view = %entry.name,
                rows = entry.rows,
                build_ms = entry.build_ms,
                "built"
            ),
            Some(error) => warn!(view = %entry.name, %error, "build failed"),
        }
    }
    println!(
        "built {}/{} views in {:.1}ms",
        report.succeeded,
        report.succeeded + report.failed,
        report.total_ms
    );
    if let Some(path) = report_path {
        report.write(path)?;
        println!("build report: {}", path.display());
    }

    if !no_audit {
        let validator = Validator::new(mvs_root, config, Arc::clone(&registry));
        let audit = validator.checksum_audit(&lake)?;
        println!(
            "checksum audit: {} passed, {} failed",
            audit.passed, audit.failed
        );
        if !audit.all_passed() {
            bail!("checksum audit failed; offending views are quarantined");
        }
    }

    if report.failed > 0 {
        bail!("{} view builds failed", report.failed);
    }
    Ok(())
}

async fn run(
    config: &RuntimeConfig,
    lake_root: &Path,
    mvs_root: &Path,
    queries_dir: &Path,
    out_dir: &Path,
) -> Result<()> {
    let lake = Lake::open(lake_root)?;
    let registry = Arc::new(Registry::open(mvs_root)?);
    std::fs::create_dir_all(out_dir)?;

    let queries = load_queries(queries_dir)?;
    if queries.is_empty() {
        bail!("no query files found in {}", queries_dir.display());
    }
    info!(
        queries = queries.len(),
        healthy_views = registry.list_healthy().len(),
        "executing"
    );

    let executor = BatchExecutor::new(
        config.clone(),
        Arc::clone(&registry),
        lake,
        mvs_root,
        out_dir,
    );

    let mut ok = 0usize;
    let mut failed = 0usize;
    for chunk in queries.chunks(config.batch_size_limit) {
        let report = executor.run_batch(chunk.to_vec()).await?;
        ok += report.succeeded();
        failed += report.outcomes.len() - report.succeeded();
        for outcome in &report.outcomes {
            println!(
                "{} -> {} [{}] {} ({:.1}ms compute, {:.1}ms io, {} rows)",
                outcome.query_id,
                outcome.source,
                outcome.match_type,
                outcome.status.as_str(),
                outcome.compute_ms,
                outcome.io_ms,
                outcome.rows
            );
        }
    }
    println!("{ok} succeeded, {failed} failed");
    Ok(())
}

fn validate(
    config: &RuntimeConfig,
    lake_root: &Path,
    mvs_root: &Path,
    queries_dir: Option<&Path>,
    report_path: Option<&Path>,
) -> Result<()> {
    let lake = Lake::open(lake_root)?;
    let registry = Arc::new(Registry::open(mvs_root)?);
    let validator = Validator::new(mvs_root, config, Arc::clone(&registry));

    let quality = validator.data_quality(&lake)?;
    println!(
        "data quality: {} passed, {} failed",
        quality.passed, quality.failed
    );

    let audit = validator.checksum_audit(&lake)?;
    println!(
        "checksum audit: {} passed, {} failed",
        audit.passed, audit.failed
    );

    let mut all_checks: Vec<_> = quality.checks;
    all_checks.extend(audit.checks);

    if let Some(dir) = queries_dir {
        let suite = load_queries(dir)?;
        let replay = validator.replay_suite(&suite, &lake)?;
        println!("replay: {} passed, {} failed", replay.passed, replay.failed);
        all_checks.extend(replay.checks);
    }

    let failed = all_checks.iter().filter(|c| !c.passed).count();
    for check in all_checks.iter().filter(|c| !c.passed) {
        warn!(check = %check.name, detail = %check.detail, "validation failure");
    }
    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&all_checks)?;
        std::fs::write(path, json)?;
        println!("validation report: {}", path.display());
    }
    if failed > 0 {
        bail!("{failed} validation checks failed");
    }
    Ok(())
}

fn status(mvs_root: &Path) -> Result<()> {
    let registry = Registry::open(mvs_root)?;
    let views = registry.snapshot().list_all();
    if views.is_empty() {
        println!("no registered views under {}", mvs_root.display());
        return Ok(());
    }
    println!(
        "{:<32} {:>8} {:>12} {:>12} {:>12}  {}",
        "VIEW", "GRAIN", "ROWS", "BYTES", "HEALTH", "WATERMARK"
    );
    for view in views {
        println!(
            "{:<32} {:>8} {:>12} {:>12} {:>12}  {}",
            view.name,
            view.grain.as_str(),
            view.row_count,
            view.byte_size,
            view.health.as_str(),
            view.source_watermark
                .map(viewhouse_core::format_day)
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

/// Load `<stem>.json` query files, sorted by name. Malformed queries are
/// reported and skipped; the rest of the run continues.
fn load_queries(dir: &Path) -> Result<Vec<(String, QuerySpec)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading query directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    paths.sort();

    let mut queries = Vec::with_capacity(paths.len());
    for path in paths {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "query".to_string());
        let raw = std::fs::read_to_string(&path)?;
        match QuerySpec::from_json(&raw) {
            Ok(query) => queries.push((stem, query)),
            Err(e) => warn!(file = %path.display(), error = %e, "skipping malformed query"),
        }
    }
    Ok(queries)
}
