//! Pooled backtest loop.
//!
//! Runs the same per-month unit as [`crate::backtest::run_backtest`] with one
//! month per task on a private rayon pool. The dataset is shared read-only;
//! rows are gathered in month order once every task has finished, and the
//! first failing month aborts the gather.

use std::thread;
use std::time::Instant;

use rayon::prelude::*;
use rollfit_core::domain::Dataset;
use rollfit_core::model::Estimator;
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::backtest::{
    build_pool, evaluate_month, plan_splits, prepare_data, run_backtest, BacktestError, RunPlan,
};
use crate::config::{BacktestConfig, SplitMode};
use crate::result::ResultTable;

/// Worker count when none is given: one core is left for the caller.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Run the backtest with one month per task on a pool of `workers` threads
/// (default [`default_workers`]).
///
/// Random-split mode has a single unit of work and runs sequentially.
pub fn run_backtest_parallel<E: Estimator>(
    data: &Dataset,
    config: &BacktestConfig,
    store: Option<&dyn ArtifactStore>,
    workers: Option<usize>,
) -> Result<ResultTable, BacktestError> {
    if config.split == SplitMode::Random {
        return run_backtest::<E>(data, config, store);
    }

    let started = Instant::now();
    let plan = RunPlan::new::<E>(config, store)?;
    let data = prepare_data(data, config)?;
    let splits = plan_splits(&data, config);

    let workers = workers.unwrap_or_else(default_workers).max(1);
    let pool = build_pool(workers)?;
    info!(
        months = splits.len(),
        window = %config.window,
        rows = data.len(),
        workers,
        "starting parallel backtest"
    );

    let rows = pool.install(|| {
        splits
            .par_iter()
            .map(|split| evaluate_month::<E>(&data, split, &plan))
            .collect::<Result<Vec<_>, _>>()
    })?;

    let table = plan.finish(rows)?;
    info!(
        months = table.len(),
        workers,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "parallel backtest finished"
    );
    Ok(table)
}
