//! Rolling-window backtest loop.
//!
//! For every test month from the window slicer:
//! 1. select the training rows (full lookback) and the test month's rows
//! 2. compute recency weights if requested
//! 3. resolve hyperparameters (fixed, from a persisted model, or grid search)
//! 4. fit, predict the held-out month and score every requested metric
//! 5. optionally persist the fitted model
//!
//! Months share no state, so the same per-month unit drives both the
//! sequential loop here and the pooled loop in [`crate::parallel`]. Any error
//! aborts the run; no partial table is returned.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rollfit_core::cv::CvStrategy;
use rollfit_core::data::DataError;
use rollfit_core::domain::{Dataset, DatasetError, Month};
use rollfit_core::metrics::{ErrorMetric, MetricError};
use rollfit_core::model::{Estimator, HyperParams, ModelError, ParamName};
use rollfit_core::rng::RngHierarchy;
use rollfit_core::window::{slice_windows, WindowSplit};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::artifacts::{
    load_estimator, model_key, random_split_key, save_estimator, ArtifactError, ArtifactStore,
};
use crate::config::{BacktestConfig, ConfigError, SampleWeighting, SplitMode, TuningMode};
use crate::grid::ParamGrid;
use crate::result::{ResultRow, ResultTable};
use crate::tuner::{tune, TuneError};

/// Seed stream for the CV shuffle of a month's grid search.
const CV_SEED_STREAM: u64 = 0;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("{month}: no training rows in [{start}, {end})")]
    EmptyTrainingWindow { month: Month, start: Month, end: Month },

    #[error("dataset has no rows")]
    EmptyDataset,

    #[error("{month}: no rows to test on")]
    EmptyTestSet { month: Month },

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("tuning error: {0}")]
    Tune(#[from] TuneError),

    #[error("metric error: {0}")]
    Metric(#[from] MetricError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("this configuration needs an artifact store")]
    NoStore,

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

// ─── Run plan ───────────────────────────────────────────────────────

/// Per-run state resolved once and shared read-only by every month.
pub(crate) struct RunPlan<'a> {
    config: &'a BacktestConfig,
    store: Option<&'a dyn ArtifactStore>,
    params: ParamSource<'a>,
    seeds: RngHierarchy,
    metrics: Vec<ErrorMetric>,
}

enum ParamSource<'a> {
    Fixed(HyperParams),
    Grid {
        base: &'a HyperParams,
        rounds: &'a [ParamGrid],
        cv: CvStrategy,
        pool: Option<ThreadPool>,
    },
}

impl<'a> RunPlan<'a> {
    pub(crate) fn new<E: Estimator>(
        config: &'a BacktestConfig,
        store: Option<&'a dyn ArtifactStore>,
    ) -> Result<Self, BacktestError> {
        config.validate()?;
        if (config.save_models || config.results_key.is_some()) && store.is_none() {
            return Err(BacktestError::NoStore);
        }

        let params = match &config.tuning {
            TuningMode::None { params } => ParamSource::Fixed(params.clone()),
            TuningMode::FromArtifact { key } => {
                let store = store.ok_or(BacktestError::NoStore)?;
                let model: E = load_estimator(store, key)?;
                info!(key = %key, params = ?model.params(), "reusing persisted hyperparameters");
                ParamSource::Fixed(model.params().clone())
            }
            TuningMode::Grid {
                base,
                rounds,
                cv,
                grid_workers,
            } => {
                let pool = grid_workers.map(build_pool).transpose()?;
                ParamSource::Grid {
                    base,
                    rounds,
                    cv: *cv,
                    pool,
                }
            }
        };

        Ok(Self {
            config,
            store,
            params,
            seeds: RngHierarchy::new(config.seed),
            metrics: config.sorted_metrics(),
        })
    }

    pub(crate) fn finish(&self, rows: Vec<ResultRow>) -> Result<ResultTable, BacktestError> {
        let table = ResultTable::new(
            self.metrics.iter().copied(),
            self.config.tuning.tuned_params(),
            rows,
        );
        if let Some(key) = &self.config.results_key {
            let store = self.store.ok_or(BacktestError::NoStore)?;
            store.store_results(key, &table)?;
            info!(key = %key, rows = table.len(), "stored result table");
        }
        Ok(table)
    }

    /// Resolve hyperparameters for one training slice.
    fn resolve_params<E: Estimator>(
        &self,
        x: &[&[f64]],
        y: &[f64],
        weights: Option<&[f64]>,
        month: Month,
    ) -> Result<(HyperParams, BTreeMap<ParamName, f64>), BacktestError> {
        match &self.params {
            ParamSource::Fixed(params) => Ok((params.clone(), BTreeMap::new())),
            ParamSource::Grid {
                base,
                rounds,
                cv,
                pool,
            } => {
                let seed = self.seeds.sub_seed(month, CV_SEED_STREAM);
                let outcome = tune::<E>(x, y, weights, base, rounds, *cv, seed, pool.as_ref())?;
                let winners = outcome.winners();
                debug!(month = %month, best = ?winners, "tuned hyperparameters");
                Ok((outcome.params, winners))
            }
        }
    }
}

pub(crate) fn build_pool(threads: usize) -> Result<ThreadPool, BacktestError> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| BacktestError::ThreadPool(e.to_string()))
}

/// Dataset after the optional seeded row sample.
pub(crate) fn prepare_data<'d>(
    data: &'d Dataset,
    config: &BacktestConfig,
) -> Result<Cow<'d, Dataset>, BacktestError> {
    Ok(match config.sample {
        Some(n) => Cow::Owned(data.sample(n, config.seed)?),
        None => Cow::Borrowed(data),
    })
}

/// Splits evaluated by a window-mode run.
pub(crate) fn plan_splits(data: &Dataset, config: &BacktestConfig) -> Vec<WindowSplit> {
    let unique = data.unique_months();
    slice_windows(
        &unique,
        config.starting_offset,
        config.ending_offset,
        config.window,
    )
}

// ─── Sequential loop ────────────────────────────────────────────────

/// Run the backtest one month at a time on the caller's thread.
///
/// Grid search, when configured, still fans candidates out over rayon.
pub fn run_backtest<E: Estimator>(
    data: &Dataset,
    config: &BacktestConfig,
    store: Option<&dyn ArtifactStore>,
) -> Result<ResultTable, BacktestError> {
    let started = Instant::now();
    let plan = RunPlan::new::<E>(config, store)?;
    let data = prepare_data(data, config)?;

    let rows = match config.split {
        SplitMode::Window => {
            let splits = plan_splits(&data, config);
            info!(months = splits.len(), window = %config.window, rows = data.len(), "starting backtest");
            splits
                .iter()
                .map(|split| evaluate_month::<E>(&data, split, &plan))
                .collect::<Result<Vec<_>, _>>()?
        }
        SplitMode::Random => vec![evaluate_random_split::<E>(&data, &plan)?],
    };

    let table = plan.finish(rows)?;
    info!(
        months = table.len(),
        elapsed_secs = started.elapsed().as_secs_f64(),
        "backtest finished"
    );
    Ok(table)
}

// ─── Per-month unit ─────────────────────────────────────────────────

/// Recency weight of every training row: `d` or `d²` where `d` is the number
/// of months since the earliest training month.
pub fn recency_weights(kind: SampleWeighting, months: &[Month]) -> Vec<f64> {
    let Some(&earliest) = months.iter().min() else {
        return Vec::new();
    };
    months
        .iter()
        .map(|m| kind.weight(m.months_since(earliest)))
        .collect()
}

/// Fit on the training slice of `split` and score its test month.
pub(crate) fn evaluate_month<E: Estimator>(
    data: &Dataset,
    split: &WindowSplit,
    plan: &RunPlan<'_>,
) -> Result<ResultRow, BacktestError> {
    let started = Instant::now();
    let month = split.test;

    let train_rows = data.rows_between(split.train_start, split.train_end);
    if train_rows.is_empty() {
        return Err(BacktestError::EmptyTrainingWindow {
            month,
            start: split.train_start,
            end: split.train_end,
        });
    }
    let test_rows = data.rows_in(month);
    trace!(
        month = %month,
        train_start = %split.train_start,
        train_end = %split.train_end,
        train_rows = train_rows.len(),
        test_rows = test_rows.len(),
        "training range"
    );

    let key = model_key(
        plan.config.tuning.family(),
        plan.config.window,
        plan.config.sample,
        month,
    );
    let row = fit_and_score::<E>(data, &train_rows, &test_rows, month, &key, plan, started)?;
    debug!(
        month = %month,
        elapsed_secs = row.duration_secs.unwrap_or_default(),
        "month evaluated"
    );
    Ok(row)
}

/// Seeded random train/test split over the whole dataset. The row is
/// reported under the latest month in the data.
fn evaluate_random_split<E: Estimator>(
    data: &Dataset,
    plan: &RunPlan<'_>,
) -> Result<ResultRow, BacktestError> {
    let started = Instant::now();
    let month = *data.months().last().ok_or(BacktestError::EmptyDataset)?;

    let mut order: Vec<usize> = (0..data.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(plan.config.seed));
    let n_test = ((data.len() as f64) * plan.config.test_fraction).ceil() as usize;
    let n_test = n_test.clamp(1, data.len().saturating_sub(1).max(1));
    let mut test_rows = order[..n_test].to_vec();
    let mut train_rows = order[n_test..].to_vec();
    test_rows.sort_unstable();
    train_rows.sort_unstable();
    if train_rows.is_empty() {
        return Err(BacktestError::EmptyTrainingWindow {
            month,
            start: month,
            end: month,
        });
    }
    info!(train_rows = train_rows.len(), test_rows = test_rows.len(), "random split");

    let key = random_split_key(plan.config.tuning.family(), plan.config.sample);
    fit_and_score::<E>(data, &train_rows, &test_rows, month, &key, plan, started)
}

fn fit_and_score<E: Estimator>(
    data: &Dataset,
    train_rows: &[usize],
    test_rows: &[usize],
    month: Month,
    key: &str,
    plan: &RunPlan<'_>,
    started: Instant,
) -> Result<ResultRow, BacktestError> {
    if test_rows.is_empty() {
        return Err(BacktestError::EmptyTestSet { month });
    }
    let (x_train, y_train) = data.select(train_rows);
    let weights = plan.config.weighting.map(|kind| {
        let months: Vec<Month> = train_rows.iter().map(|&i| data.months()[i]).collect();
        recency_weights(kind, &months)
    });

    let (params, winners) = plan.resolve_params::<E>(&x_train, &y_train, weights.as_deref(), month)?;
    let mut model = E::from_params(&params, data.feature_count())?;
    model.fit(&x_train, &y_train, weights.as_deref())?;

    let (x_test, y_test) = data.select(test_rows);
    let predicted = model.predict(&x_test)?;
    let metrics = plan
        .metrics
        .iter()
        .map(|m| Ok((*m, m.compute(&predicted, &y_test)?)))
        .collect::<Result<BTreeMap<_, _>, MetricError>>()?;

    if plan.config.save_models {
        let store = plan.store.ok_or(BacktestError::NoStore)?;
        save_estimator(store, key, &model)?;
        trace!(month = %month, key = %key, "stored model");
    }

    Ok(ResultRow {
        month,
        duration_secs: Some(started.elapsed().as_secs_f64()),
        metrics,
        params: winners,
    })
}
