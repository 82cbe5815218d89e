//! RollFit CLI: backtest and ensemble commands.
//!
//! Commands:
//! - `backtest`: rolling-window backtest of a gradient-boosted model from a TOML config
//! - `ensemble`: blend persisted per-window-size models month by month
//!
//! Result tables are written as CSV to `--output` or stdout. `RUST_LOG`
//! controls log verbosity (default `info`); logs go to stderr.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollfit_core::model::GbdtRegressor;
use rollfit_runner::{
    run_backtest, run_backtest_parallel, run_ensemble, ArtifactStore, BacktestConfig,
    EnsembleConfig, FsArtifactStore, ResultTable,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rollfit",
    about = "RollFit CLI: rolling-window backtests of gradient-boosted price models"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a rolling-window backtest from a TOML config file.
    Backtest {
        /// Path to the backtest TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Listings file (.csv or .parquet).
        #[arg(long)]
        data: PathBuf,

        /// Evaluate months in parallel.
        #[arg(long, default_value_t = false)]
        parallel: bool,

        /// Worker threads for --parallel. Defaults to all cores but one.
        #[arg(long)]
        workers: Option<usize>,

        /// Artifact directory for models and result tables.
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Write the result CSV here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Blend persisted models of several window sizes.
    Ensemble {
        /// Path to the ensemble TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Listings file (.csv or .parquet).
        #[arg(long)]
        data: PathBuf,

        /// Artifact directory holding the constituent models.
        #[arg(long, default_value = "artifacts")]
        artifacts: PathBuf,

        /// Write the result CSV here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Backtest {
            config,
            data,
            parallel,
            workers,
            artifacts,
            output,
        } => run_backtest_cmd(&config, &data, parallel, workers, artifacts, output),
        Commands::Ensemble {
            config,
            data,
            artifacts,
            output,
        } => run_ensemble_cmd(&config, &data, &artifacts, output),
    }
}

fn run_backtest_cmd(
    config_path: &Path,
    data_path: &Path,
    parallel: bool,
    workers: Option<usize>,
    artifacts: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = BacktestConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let data = config
        .data
        .load(data_path)
        .with_context(|| format!("loading {}", data_path.display()))?;
    info!(rows = data.len(), months = data.unique_months().len(), "loaded listings");

    let store = artifacts.map(FsArtifactStore::new).transpose()?;
    let store_ref = store.as_ref().map(|s| s as &dyn ArtifactStore);

    let table = if parallel {
        run_backtest_parallel::<GbdtRegressor>(&data, &config, store_ref, workers)?
    } else {
        run_backtest::<GbdtRegressor>(&data, &config, store_ref)?
    };

    summarize(&table);
    write_table(&table, output.as_deref())
}

fn run_ensemble_cmd(
    config_path: &Path,
    data_path: &Path,
    artifacts: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = EnsembleConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let data = config
        .data
        .load(data_path)
        .with_context(|| format!("loading {}", data_path.display()))?;
    let store = FsArtifactStore::new(artifacts)?;

    let table = run_ensemble::<GbdtRegressor>(&data, &config, &store)?;

    summarize(&table);
    write_table(&table, output.as_deref())
}

/// Log the mean of every metric column over the scored months.
fn summarize(table: &ResultTable) {
    for &metric in table.metrics() {
        let values: Vec<f64> = table.rows().iter().filter_map(|r| r.metric(metric)).collect();
        if values.is_empty() {
            continue;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        info!(metric = %metric, months = values.len(), mean, "summary");
    }
}

fn write_table(table: &ResultTable, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            table.write_to(path)?;
            info!(path = %path.display(), "results written");
        }
        None => table.write_csv(io::stdout().lock())?,
    }
    Ok(())
}
