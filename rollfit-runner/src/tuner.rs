//! Sequential multi-round grid search.
//!
//! Each round searches the cartesian product of its grid, refined with the
//! winners of every earlier round. A candidate's score is the mean held-out
//! MSE across the CV folds; fits use the fold's sample weights while scoring
//! is unweighted. A fold whose training weights sum to zero is fit
//! unweighted. Candidates of one round are evaluated in parallel on rayon,
//! and the first candidate wins ties so results do not depend on scheduling.

use std::collections::BTreeMap;

use rayon::prelude::*;
use rayon::ThreadPool;
use rollfit_core::cv::{CvError, CvStrategy, Fold};
use rollfit_core::metrics::{mse, MetricError};
use rollfit_core::model::{Estimator, HyperParams, ModelError, ParamName};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::grid::{refine_grid, Combination, ParamGrid};

#[derive(Debug, Error)]
pub enum TuneError {
    #[error("grid search needs at least one round")]
    EmptyGrid,

    #[error("round {round}: no candidate values for {param}")]
    EmptyCandidates { round: usize, param: ParamName },

    #[error("{samples} training rows are too few for {splits} CV splits")]
    TooFewSamples { samples: usize, splits: usize },

    #[error("cv error: {0}")]
    Cv(CvError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("metric error: {0}")]
    Metric(#[from] MetricError),
}

impl From<CvError> for TuneError {
    fn from(err: CvError) -> Self {
        match err {
            CvError::TooFewSamples { splits, samples } => {
                TuneError::TooFewSamples { samples, splits }
            }
            other => TuneError::Cv(other),
        }
    }
}

/// Winner of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round: usize,
    pub candidates: usize,
    /// Accumulated winning values after this round.
    pub best: BTreeMap<ParamName, f64>,
    /// Mean held-out MSE of the winner.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningOutcome {
    pub params: HyperParams,
    pub rounds: Vec<RoundOutcome>,
}

impl TuningOutcome {
    /// Winning value of every hyperparameter named in any round.
    pub fn winners(&self) -> BTreeMap<ParamName, f64> {
        self.rounds.last().map(|r| r.best.clone()).unwrap_or_default()
    }
}

/// Run every round of the grid search over one training slice.
///
/// `pool`, when given, bounds the number of threads used for candidate
/// evaluation; otherwise the global rayon pool is used.
#[allow(clippy::too_many_arguments)]
pub fn tune<E: Estimator>(
    x: &[&[f64]],
    y: &[f64],
    weights: Option<&[f64]>,
    base: &HyperParams,
    rounds: &[ParamGrid],
    cv: CvStrategy,
    seed: u64,
    pool: Option<&ThreadPool>,
) -> Result<TuningOutcome, TuneError> {
    if rounds.is_empty() {
        return Err(TuneError::EmptyGrid);
    }
    for (round, grid) in rounds.iter().enumerate() {
        if let Some(param) = grid.first_empty() {
            return Err(TuneError::EmptyCandidates { round, param });
        }
    }
    let feature_count = x.first().map_or(0, |row| row.len());
    let folds = cv.folds(x.len(), seed)?;

    let mut best: BTreeMap<ParamName, f64> = BTreeMap::new();
    let mut outcomes = Vec::with_capacity(rounds.len());
    for (round, next) in rounds.iter().enumerate() {
        let grid = refine_grid(&best, next);
        let candidates = grid.combinations();

        let evaluate = || {
            candidates
                .par_iter()
                .map(|combo| {
                    let params = base.with(combo)?;
                    cv_score::<E>(x, y, weights, &params, feature_count, &folds)
                })
                .collect::<Result<Vec<f64>, TuneError>>()
        };
        let scores = match pool {
            Some(pool) => pool.install(evaluate)?,
            None => evaluate()?,
        };

        let (winner, score) = first_minimum(&scores);
        best = to_map(&candidates[winner]);
        trace!(round, candidates = candidates.len(), score, best = ?best, "round winner");
        outcomes.push(RoundOutcome {
            round,
            candidates: candidates.len(),
            best: best.clone(),
            score,
        });
    }

    let overrides: Combination = best.iter().map(|(&k, &v)| (k, v)).collect();
    Ok(TuningOutcome {
        params: base.with(&overrides)?,
        rounds: outcomes,
    })
}

/// Mean held-out MSE of `params` over `folds`.
///
/// Early time-ordered folds can hold only zero-weight rows; those folds are
/// fit without weights.
pub fn cv_score<E: Estimator>(
    x: &[&[f64]],
    y: &[f64],
    weights: Option<&[f64]>,
    params: &HyperParams,
    feature_count: usize,
    folds: &[Fold],
) -> Result<f64, TuneError> {
    let mut total = 0.0;
    for fold in folds {
        let x_train: Vec<&[f64]> = fold.train.iter().map(|&i| x[i]).collect();
        let y_train: Vec<f64> = fold.train.iter().map(|&i| y[i]).collect();
        let w_train: Option<Vec<f64>> = weights
            .map(|w| fold.train.iter().map(|&i| w[i]).collect::<Vec<f64>>())
            .filter(|w| w.iter().sum::<f64>() > 0.0);

        let mut model = E::from_params(params, feature_count)?;
        model.fit(&x_train, &y_train, w_train.as_deref())?;

        let x_test: Vec<&[f64]> = fold.test.iter().map(|&i| x[i]).collect();
        let y_test: Vec<f64> = fold.test.iter().map(|&i| y[i]).collect();
        let predicted = model.predict(&x_test)?;
        total += mse(&predicted, &y_test)?;
    }
    Ok(total / folds.len() as f64)
}

/// Index and value of the first minimum. NaN scores never win.
fn first_minimum(scores: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, &s) in scores.iter().enumerate() {
        if s < best.1 {
            best = (i, s);
        }
    }
    if best.1 == f64::INFINITY {
        (0, scores.first().copied().unwrap_or(f64::NAN))
    } else {
        best
    }
}

fn to_map(combo: &Combination) -> BTreeMap<ParamName, f64> {
    combo.iter().copied().collect()
}
