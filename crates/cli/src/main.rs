//! Param-Optimizer: parameter search for trading strategies
//!
//! Usage:
//!   param-optimizer run --config run.json    Run an optimization
//!   param-optimizer history --limit 10       List recorded runs

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::{
    HttpBacktestRunner, NamedParameter, OptimizationConfig, OptimizationEngine,
    OptimizationResult, ParameterSpace, ProgressEvent, RunOutcome, SqliteTrialRecorder,
    TrialStatus,
};
use persistence::repository::TrialRepository;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "data/optimizer.db";
const DEFAULT_RUNNER_TIMEOUT_SECS: u64 = 300;

#[derive(Parser)]
#[command(name = "param-optimizer")]
#[command(about = "Search strategy parameter spaces against a backtest runner", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an optimization described by a JSON run file
    Run {
        /// Run file with `runner`, `optimization` and `parameters` sections
        #[arg(short, long)]
        config: PathBuf,
        /// Trial store path (defaults to OPTIMIZER_DB_PATH or data/optimizer.db)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Do not record the run
        #[arg(long)]
        no_db: bool,
        /// Number of top trials to print
        #[arg(long, default_value_t = 10)]
        top_n: usize,
        /// Optional JSON export path for the full result
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Show recorded runs, or the best trials of one run
    History {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: i64,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

/// Backtest runner endpoint
#[derive(Debug, Deserialize)]
struct RunnerSection {
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_RUNNER_TIMEOUT_SECS
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: DEFAULT_RUNNER_TIMEOUT_SECS,
        }
    }
}

/// Contents of a run file
#[derive(Debug, Deserialize)]
struct RunFile {
    #[serde(default)]
    runner: RunnerSection,
    optimization: OptimizationConfig,
    parameters: Vec<NamedParameter>,
}

impl RunFile {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid run file {}", path.display()))
    }

    /// `OPTIMIZER_RUNNER_URL` wins over the file
    fn runner_url(&self) -> anyhow::Result<String> {
        std::env::var("OPTIMIZER_RUNNER_URL")
            .ok()
            .or_else(|| self.runner.url.clone())
            .context("No backtest runner URL: set runner.url or OPTIMIZER_RUNNER_URL")
    }
}

fn db_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("OPTIMIZER_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,param_optimizer=debug")
    } else {
        EnvFilter::new("info,engine=info,param_optimizer=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Completed => 0,
        RunOutcome::Interrupted => 130,
        RunOutcome::Aborted { .. } => 2,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let result = match cli.command {
        Commands::Run {
            config,
            db,
            no_db,
            top_n,
            export,
        } => cmd_run(&config, db, no_db, top_n, export)
            .await
            .map(|outcome| exit_code(&outcome)),
        Commands::History { run_id, limit, db } => {
            cmd_history(run_id, limit, db).await.map(|_| 0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

// ============================================================================
// Run command
// ============================================================================

async fn cmd_run(
    config_path: &Path,
    db: Option<PathBuf>,
    no_db: bool,
    top_n: usize,
    export: Option<PathBuf>,
) -> anyhow::Result<RunOutcome> {
    println!("\n=== Param-Optimizer v{} ===", APP_VERSION);

    let run_file = RunFile::load(config_path)?;
    let space = ParameterSpace::from_named(run_file.parameters.clone())?;
    let url = run_file.runner_url()?;
    let optimization = run_file.optimization;
    let hold_target = optimization
        .constraints
        .as_ref()
        .and_then(|c| c.target_hold_period_days);
    let runner = Arc::new(
        HttpBacktestRunner::new(
            url.clone(),
            Duration::from_secs(run_file.runner.timeout_secs),
        )?
        .with_hold_target(hold_target),
    );

    println!(
        "Algorithm: {} | Objective: {} | Combinations: {} | Max failures: {}",
        optimization.algorithm,
        optimization.objective,
        space.cardinality(),
        optimization.max_failures
    );
    println!("Runner: {}", url);

    let mut engine = OptimizationEngine::new(optimization, space, runner)?
        .with_signal_handling(true)
        .with_progress(print_progress);

    if no_db {
        println!("Trial store: disabled");
    } else {
        let path = db_path(db);
        match persistence::Database::new(&path).await {
            Ok(database) => {
                println!("Trial store: {}", path.display());
                engine = engine.with_recorder(Arc::new(SqliteTrialRecorder::new(
                    database.pool_clone(),
                )));
            }
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Trial store unavailable, continuing without it"
            ),
        }
    }
    println!("Press Ctrl+C to stop after the current trial\n");

    let result = engine.run().await;
    println!();

    println!("\n{}", result.summary());
    print_top_trials(&result, top_n);

    if let Some(export_path) = export {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&export_path, &json)
            .with_context(|| format!("Failed to write {}", export_path.display()))?;
        println!("\nResults exported to {}", export_path.display());
    }

    info!(run_id = %result.run_id, outcome = result.outcome.as_str(), "Run finished");
    Ok(result.outcome)
}

fn print_progress(event: &ProgressEvent) {
    let total = event
        .total
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_string());
    let best = event
        .best_score
        .map(|s| format!("{:.4}", s))
        .unwrap_or_else(|| "-".to_string());
    let mark = match event.status {
        TrialStatus::Succeeded => "ok",
        TrialStatus::Failed => "FAILED",
    };

    print!(
        "\r  Trial {}/{} [{}] | Best: {} | Failures: {} | {:.1}s | {}          ",
        event.completed,
        total,
        mark,
        best,
        event.failed_total(),
        event.elapsed.as_secs_f64(),
        engine::format_params(&event.params),
    );
    let _ = std::io::stdout().flush();
}

fn print_top_trials(result: &OptimizationResult, top_n: usize) {
    let top = result.top_trials(top_n);
    if top.is_empty() {
        println!("\nNo successful trials.");
        return;
    }

    println!("\nTop {} Trials:", top.len());
    println!(
        "  {:>3}  {:>6} {:>12} {:>9} {:>8} {:>7}  {}",
        "#", "Trial", "Score", "Return%", "Sharpe", "Trades", "Params"
    );
    println!("  {}", "-".repeat(80));
    for (i, t) in top.iter().enumerate() {
        let (ret, sharpe, trades) = t
            .stats
            .as_ref()
            .map(|s| (s.total_return_pct, s.sharpe_ratio, s.total_trades))
            .unwrap_or_default();
        println!(
            "  {:>3}  {:>6} {:>12.4} {:>+9.2} {:>8.2} {:>7}  {}",
            i + 1,
            t.index,
            t.score,
            ret,
            sharpe,
            trades,
            engine::format_params(&t.params),
        );
    }
}

// ============================================================================
// History command
// ============================================================================

fn format_timestamp(ts: Option<i64>) -> String {
    ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

async fn cmd_history(
    run_id: Option<String>,
    limit: i64,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let path = db_path(db);
    let database = persistence::Database::new(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;
    let repo = TrialRepository::new(database.pool());

    match run_id {
        Some(run_id) => {
            let run = repo
                .get_run(&run_id)
                .await?
                .with_context(|| format!("Unknown run {}", run_id))?;
            println!(
                "\nRun {} | {} / {} | {} | started {}",
                run.run_id,
                run.algorithm,
                run.objective,
                run.outcome.as_deref().unwrap_or("running"),
                format_timestamp(run.started_at)
            );
            println!(
                "  Trials: {} total, {} failed | Best: {}",
                run.total_trials,
                run.failed_trials,
                run.best_score.as_deref().unwrap_or("-")
            );

            let trials = repo.get_top_trials(&run_id, limit).await?;
            println!("\n  {:>3}  {:>6} {:>14}  {}", "#", "Trial", "Score", "Params");
            println!("  {}", "-".repeat(70));
            for (i, t) in trials.iter().enumerate() {
                println!(
                    "  {:>3}  {:>6} {:>14}  {}",
                    i + 1,
                    t.trial_index,
                    t.score,
                    t.params
                );
            }
        }
        None => {
            let runs = repo.get_recent_runs(limit).await?;
            if runs.is_empty() {
                println!("\nNo recorded runs in {}", path.display());
                return Ok(());
            }
            println!(
                "\n  {:<26} {:<13} {:<32} {:<12} {:>7} {:>7}  {}",
                "Run", "Algorithm", "Objective", "Outcome", "Trials", "Failed", "Started"
            );
            println!("  {}", "-".repeat(120));
            for run in runs {
                println!(
                    "  {:<26} {:<13} {:<32} {:<12} {:>7} {:>7}  {}",
                    run.run_id,
                    run.algorithm,
                    run.objective,
                    run.outcome.as_deref().unwrap_or("running"),
                    run.total_trials,
                    run.failed_trials,
                    format_timestamp(run.started_at)
                );
            }
        }
    }

    Ok(())
}
