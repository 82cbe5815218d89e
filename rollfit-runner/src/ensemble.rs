//! Post-hoc ensembling of persisted per-window-size models.
//!
//! For each eligible test month one fitted model per window size is loaded,
//! every model predicts the month's listings and the predictions are blended.
//! Weighted modes derive their weights from each window size's error on the
//! calendar-previous month, read back from the error tables of an earlier
//! untuned backtest.

use std::collections::BTreeMap;
use std::time::Instant;

use rollfit_core::domain::{Dataset, DatasetError, Month};
use rollfit_core::metrics::{ErrorMetric, MetricError};
use rollfit_core::model::{Estimator, ModelError, ParamName};
use rollfit_core::window::WindowSpec;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::artifacts::{
    ensemble_key, error_table_key, load_estimator, model_key, save_json, ArtifactError,
    ArtifactStore,
};
use crate::config::{ConfigError, EnsembleConfig, WeightingMode};
use crate::result::{ResultRow, ResultTable};

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("metric error: {0}")]
    Metric(#[from] MetricError),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("no error row for {month} in the window-{window} table")]
    MissingErrorRow { month: Month, window: u32 },

    #[error("no {metric} value for {month} in the window-{window} table")]
    MissingErrorValue {
        month: Month,
        window: u32,
        metric: ErrorMetric,
    },

    #[error("error vector {0:?} cannot be turned into weights")]
    DegenerateErrors(Vec<f64>),

    #[error("{predictions} prediction vectors but {weights} weights")]
    LengthMismatch { predictions: usize, weights: usize },

    #[error("ensemble has no constituents")]
    NoConstituents,

    #[error("{month}: no rows to test on")]
    EmptyTestSet { month: Month },
}

/// Ensemble tables carry no hyperparameter columns.
const NO_PARAMS: [ParamName; 0] = [];

// ─── Weights ────────────────────────────────────────────────────────

/// Scale non-negative finite values to sum to 1.
pub fn normalize(values: &[f64]) -> Result<Vec<f64>, EnsembleError> {
    let sum: f64 = values.iter().sum();
    if values.is_empty()
        || values.iter().any(|v| !v.is_finite() || *v < 0.0)
        || !sum.is_finite()
        || sum <= 0.0
    {
        return Err(EnsembleError::DegenerateErrors(values.to_vec()));
    }
    Ok(values.iter().map(|v| v / sum).collect())
}

pub fn equal_weights(n: usize) -> Result<Vec<f64>, EnsembleError> {
    if n == 0 {
        return Err(EnsembleError::NoConstituents);
    }
    Ok(vec![1.0 / n as f64; n])
}

/// Normalize the errors, take reciprocals and renormalize.
///
/// A zero error would take all the weight, so it is rejected.
pub fn inverse_error_weights(errors: &[f64]) -> Result<Vec<f64>, EnsembleError> {
    let normalized = normalize(errors)?;
    if normalized.iter().any(|v| *v == 0.0) {
        return Err(EnsembleError::DegenerateErrors(errors.to_vec()));
    }
    let reciprocals: Vec<f64> = normalized.iter().map(|v| 1.0 / v).collect();
    normalize(&reciprocals)
}

/// One-hot on the smallest normalized error; the first wins ties.
pub fn argmin_weights(errors: &[f64]) -> Result<Vec<f64>, EnsembleError> {
    let normalized = normalize(errors)?;
    let mut best = 0;
    for (i, v) in normalized.iter().enumerate() {
        if *v < normalized[best] {
            best = i;
        }
    }
    let mut weights = vec![0.0; normalized.len()];
    weights[best] = 1.0;
    Ok(weights)
}

/// Weighted sum of the constituent predictions, row by row.
pub fn ensemble_predict(predictions: &[Vec<f64>], weights: &[f64]) -> Result<Vec<f64>, EnsembleError> {
    if predictions.len() != weights.len() {
        return Err(EnsembleError::LengthMismatch {
            predictions: predictions.len(),
            weights: weights.len(),
        });
    }
    let first = predictions.first().ok_or(EnsembleError::NoConstituents)?;
    if let Some(other) = predictions.iter().find(|p| p.len() != first.len()) {
        return Err(MetricError::LengthMismatch {
            predicted: other.len(),
            actual: first.len(),
        }
        .into());
    }
    Ok((0..first.len())
        .map(|row| {
            predictions
                .iter()
                .zip(weights)
                .map(|(p, w)| p[row] * w)
                .sum()
        })
        .collect())
}

// ─── Ensemble loop ──────────────────────────────────────────────────

/// Months evaluated by an ensemble run.
pub fn eligible_months(
    unique: &[Month],
    starting_offset: usize,
    ending_offset: Option<usize>,
    window_sizes: &[u32],
) -> Vec<Month> {
    let largest = window_sizes.iter().copied().max().unwrap_or(0) as usize;
    let first = starting_offset.max(largest);
    let end = ending_offset.unwrap_or(unique.len()).min(unique.len());
    if first >= end {
        return Vec::new();
    }
    unique[first..end].to_vec()
}

/// Blend the persisted per-window-size models for every eligible month and
/// score each blend against the month's actual targets.
pub fn run_ensemble<E: Estimator>(
    data: &Dataset,
    config: &EnsembleConfig,
    store: &dyn ArtifactStore,
) -> Result<ResultTable, EnsembleError> {
    config.validate()?;
    let started = Instant::now();
    let windows = config.sorted_window_sizes();
    let metrics = config.sorted_metrics();

    let months = eligible_months(
        &data.unique_months(),
        config.starting_offset,
        config.ending_offset,
        &windows,
    );
    info!(
        months = months.len(),
        windows = ?windows,
        weighting = ?config.weighting,
        "starting ensemble"
    );
    let (Some(&first), Some(&last)) = (months.first(), months.last()) else {
        return Ok(ResultTable::new(metrics, NO_PARAMS, Vec::new()));
    };

    let mut data = data.restrict(Some(first), Some(last));
    if let Some(n) = config.sample {
        data = data.sample(n, config.seed)?;
    }

    let error_tables = if config.weighting.needs_prior_errors() {
        windows
            .iter()
            .map(|&w| store.load_results(&error_table_key(&config.experiment, w)))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        Vec::new()
    };

    let mut rows = Vec::with_capacity(months.len());
    for (i, &month) in months.iter().enumerate() {
        let month_started = Instant::now();

        let prior = if config.weighting.needs_prior_errors() {
            match prior_errors(&error_tables, &windows, month.prev(), &metrics)? {
                Some(prior) => Some(prior),
                None if i == 0 => {
                    debug!(month = %month, "no prior-month errors, skipping first month");
                    rows.push(ResultRow::empty(month));
                    continue;
                }
                None => {
                    let window = missing_window(&error_tables, &windows, month.prev());
                    return Err(EnsembleError::MissingErrorRow {
                        month: month.prev(),
                        window,
                    });
                }
            }
        } else {
            None
        };

        let test_rows = data.rows_in(month);
        if test_rows.is_empty() {
            return Err(EnsembleError::EmptyTestSet { month });
        }
        let (x_test, y_test) = data.select(&test_rows);

        let models = windows
            .iter()
            .map(|&w| {
                let key = model_key(config.models, WindowSpec::Rolling(w), config.sample, month);
                load_estimator::<E>(store, &key)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let predictions = models
            .iter()
            .map(|model| model.predict(&x_test))
            .collect::<Result<Vec<_>, _>>()?;

        if config.save_ensembles {
            let key = ensemble_key(
                config.models,
                &windows,
                config.weighting.label(),
                config.sample,
                month,
            );
            save_json(store, &key, &models)?;
            trace!(month = %month, key = %key, "stored ensemble");
        }

        let mut scores = BTreeMap::new();
        for metric in &metrics {
            let weights = match (config.weighting, &prior) {
                (WeightingMode::InverseError, Some(prior)) => inverse_error_weights(&prior[metric])?,
                (WeightingMode::Argmin, Some(prior)) => argmin_weights(&prior[metric])?,
                _ => equal_weights(models.len())?,
            };
            let blended = ensemble_predict(&predictions, &weights)?;
            scores.insert(*metric, metric.compute(&blended, &y_test)?);
            trace!(month = %month, metric = %metric, weights = ?weights, "blended");
        }

        rows.push(ResultRow {
            month,
            duration_secs: Some(month_started.elapsed().as_secs_f64()),
            metrics: scores,
            params: BTreeMap::new(),
        });
        debug!(month = %month, "ensemble month evaluated");
    }

    let table = ResultTable::new(metrics, NO_PARAMS, rows);
    if let Some(key) = &config.results_key {
        store.store_results(key, &table)?;
        info!(key = %key, rows = table.len(), "stored ensemble result table");
    }
    info!(
        months = table.len(),
        elapsed_secs = started.elapsed().as_secs_f64(),
        "ensemble finished"
    );
    Ok(table)
}

/// Each window size's error on `prev`, per metric, in window order.
///
/// `None` when some table has no row for `prev`.
fn prior_errors(
    tables: &[ResultTable],
    windows: &[u32],
    prev: Month,
    metrics: &[ErrorMetric],
) -> Result<Option<BTreeMap<ErrorMetric, Vec<f64>>>, EnsembleError> {
    let mut rows = Vec::with_capacity(tables.len());
    for table in tables {
        match table.row(prev) {
            Some(row) => rows.push(row),
            None => return Ok(None),
        }
    }

    let mut out = BTreeMap::new();
    for &metric in metrics {
        let values = rows
            .iter()
            .zip(windows)
            .map(|(row, &window)| {
                row.metric(metric).ok_or(EnsembleError::MissingErrorValue {
                    month: prev,
                    window,
                    metric,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        out.insert(metric, values);
    }
    Ok(Some(out))
}

fn missing_window(tables: &[ResultTable], windows: &[u32], prev: Month) -> u32 {
    tables
        .iter()
        .zip(windows)
        .find(|(table, _)| table.row(prev).is_none())
        .map_or(0, |(_, &w)| w)
}
