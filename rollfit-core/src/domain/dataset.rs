//! In-memory listing table: one row per listing with a month, target and features.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::month::Month;

/// One listing before it is placed into a [`Dataset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub month: Month,
    pub target: f64,
    pub features: Vec<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("row {row}: expected {expected} features, found {found}")]
    FeatureCount {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("row {row}: target is not finite ({value})")]
    NonFiniteTarget { row: usize, value: f64 },
    #[error("cannot sample {requested} rows from a dataset of {available}")]
    SampleTooLarge { requested: usize, available: usize },
}

/// Cleaned tabular dataset, kept sorted by month.
///
/// Row order within a month is the insertion order (stable sort), so
/// downstream time-ordered splits are reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    target_name: String,
    feature_names: Vec<String>,
    months: Vec<Month>,
    target: Vec<f64>,
    features: Vec<Vec<f64>>,
}

impl Dataset {
    pub fn new(
        target_name: impl Into<String>,
        feature_names: Vec<String>,
        mut rows: Vec<Observation>,
    ) -> Result<Self, DatasetError> {
        for (row, obs) in rows.iter().enumerate() {
            if obs.features.len() != feature_names.len() {
                return Err(DatasetError::FeatureCount {
                    row,
                    expected: feature_names.len(),
                    found: obs.features.len(),
                });
            }
            if !obs.target.is_finite() {
                return Err(DatasetError::NonFiniteTarget {
                    row,
                    value: obs.target,
                });
            }
        }

        rows.sort_by_key(|obs| obs.month);

        let mut months = Vec::with_capacity(rows.len());
        let mut target = Vec::with_capacity(rows.len());
        let mut features = Vec::with_capacity(rows.len());
        for obs in rows {
            months.push(obs.month);
            target.push(obs.target);
            features.push(obs.features);
        }

        Ok(Self {
            target_name: target_name.into(),
            feature_names,
            months,
            target,
            features,
        })
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn months(&self) -> &[Month] {
        &self.months
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }

    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    /// Distinct months, strictly increasing.
    pub fn unique_months(&self) -> Vec<Month> {
        let mut unique = self.months.clone();
        unique.dedup();
        unique
    }

    /// Row indices with `start <= month < end`.
    pub fn rows_between(&self, start: Month, end: Month) -> Vec<usize> {
        let lo = self.months.partition_point(|m| *m < start);
        let hi = self.months.partition_point(|m| *m < end);
        (lo..hi.max(lo)).collect()
    }

    /// Row indices listed in `month`.
    pub fn rows_in(&self, month: Month) -> Vec<usize> {
        self.rows_between(month, month.plus_months(1))
    }

    /// Feature rows and targets for the given row indices.
    pub fn select(&self, rows: &[usize]) -> (Vec<&[f64]>, Vec<f64>) {
        let x = rows.iter().map(|&i| self.features[i].as_slice()).collect();
        let y = rows.iter().map(|&i| self.target[i]).collect();
        (x, y)
    }

    /// Keep only rows with `from <= month <= to` (either bound optional).
    pub fn restrict(&self, from: Option<Month>, to: Option<Month>) -> Self {
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| from.map_or(true, |f| self.months[i] >= f))
            .filter(|&i| to.map_or(true, |t| self.months[i] <= t))
            .collect();
        self.subset(&keep)
    }

    /// Seeded random sample of `n` rows without replacement. Month order is preserved.
    pub fn sample(&self, n: usize, seed: u64) -> Result<Self, DatasetError> {
        if n > self.len() {
            return Err(DatasetError::SampleTooLarge {
                requested: n,
                available: self.len(),
            });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked = rand::seq::index::sample(&mut rng, self.len(), n).into_vec();
        picked.sort_unstable();
        Ok(self.subset(&picked))
    }

    /// New dataset holding the given rows (indices must be ascending to keep month order).
    fn subset(&self, rows: &[usize]) -> Self {
        Self {
            target_name: self.target_name.clone(),
            feature_names: self.feature_names.clone(),
            months: rows.iter().map(|&i| self.months[i]).collect(),
            target: rows.iter().map(|&i| self.target[i]).collect(),
            features: rows.iter().map(|&i| self.features[i].clone()).collect(),
        }
    }
}
