//! Cross-validation fold generation.
//!
//! Two splitters:
//! - shuffled K-fold: the first `n % k` folds hold one extra sample
//! - time-series split: expanding train prefix, `n / (k + 1)` test samples per fold
//!
//! Only index generation lives here. Fitting and scoring happen in the tuner.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_SPLITS: usize = 5;

fn default_splits() -> usize {
    DEFAULT_SPLITS
}

#[derive(Debug, Error, PartialEq)]
pub enum CvError {
    #[error("need at least {min} splits, got {got}")]
    TooFewSplits { min: usize, got: usize },
    #[error("cannot build {splits} folds from {samples} samples")]
    TooFewSamples { splits: usize, samples: usize },
}

/// Cross-validation strategy used during grid search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CvStrategy {
    /// Shuffled K-fold. The shuffle is seeded, so folds are reproducible.
    RandomCv {
        #[serde(default = "default_splits")]
        n_splits: usize,
    },
    /// Time-ordered expanding splitter. Ignores the seed.
    TimeSeriesSplit {
        #[serde(default = "default_splits")]
        n_splits: usize,
    },
}

impl Default for CvStrategy {
    fn default() -> Self {
        CvStrategy::RandomCv {
            n_splits: DEFAULT_SPLITS,
        }
    }
}

impl CvStrategy {
    /// Name used in artifact keys.
    pub fn label(&self) -> &'static str {
        match self {
            CvStrategy::RandomCv { .. } => "random_cv",
            CvStrategy::TimeSeriesSplit { .. } => "time_series_split",
        }
    }

    pub fn n_splits(&self) -> usize {
        match self {
            CvStrategy::RandomCv { n_splits } | CvStrategy::TimeSeriesSplit { n_splits } => {
                *n_splits
            }
        }
    }

    pub fn validate(&self) -> Result<(), CvError> {
        let min = match self {
            CvStrategy::RandomCv { .. } => 2,
            CvStrategy::TimeSeriesSplit { .. } => 1,
        };
        if self.n_splits() < min {
            return Err(CvError::TooFewSplits {
                min,
                got: self.n_splits(),
            });
        }
        Ok(())
    }

    /// Folds over `n_samples` rows (rows must be in time order for the
    /// time-series splitter).
    pub fn folds(&self, n_samples: usize, seed: u64) -> Result<Vec<Fold>, CvError> {
        match *self {
            CvStrategy::RandomCv { n_splits } => k_fold(n_samples, n_splits, seed),
            CvStrategy::TimeSeriesSplit { n_splits } => time_series_split(n_samples, n_splits),
        }
    }
}

impl fmt::Display for CvStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(n_splits={})", self.label(), self.n_splits())
    }
}

/// A single train/held-out partition, as row indices into the training slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffled K-fold. Both index lists are returned sorted.
pub fn k_fold(n_samples: usize, n_splits: usize, seed: u64) -> Result<Vec<Fold>, CvError> {
    if n_splits < 2 {
        return Err(CvError::TooFewSplits {
            min: 2,
            got: n_splits,
        });
    }
    if n_samples < n_splits {
        return Err(CvError::TooFewSamples {
            splits: n_splits,
            samples: n_samples,
        });
    }

    let mut order: Vec<usize> = (0..n_samples).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let base = n_samples / n_splits;
    let extra = n_samples % n_splits;
    let mut folds = Vec::with_capacity(n_splits);
    let mut start = 0;
    for i in 0..n_splits {
        let size = base + usize::from(i < extra);
        let end = start + size;

        let mut test = order[start..end].to_vec();
        let mut train: Vec<usize> = order[..start]
            .iter()
            .chain(&order[end..])
            .copied()
            .collect();
        test.sort_unstable();
        train.sort_unstable();
        folds.push(Fold { train, test });

        start = end;
    }
    Ok(folds)
}

/// Forward-chaining split: fold `i` trains on every row before its test block.
pub fn time_series_split(n_samples: usize, n_splits: usize) -> Result<Vec<Fold>, CvError> {
    if n_splits < 1 {
        return Err(CvError::TooFewSplits {
            min: 1,
            got: n_splits,
        });
    }
    if n_samples < n_splits + 1 {
        return Err(CvError::TooFewSamples {
            splits: n_splits,
            samples: n_samples,
        });
    }

    let test_size = n_samples / (n_splits + 1);
    let first_test = n_samples - n_splits * test_size;
    Ok((0..n_splits)
        .map(|i| {
            let test_start = first_test + i * test_size;
            Fold {
                train: (0..test_start).collect(),
                test: (test_start..test_start + test_size).collect(),
            }
        })
        .collect())
}
