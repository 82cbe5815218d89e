//! Estimator seam and hyperparameters.
//!
//! The backtest and tuner only see the [`Estimator`] trait. The concrete
//! gradient-boosted regressor lives in [`gbdt`].

pub mod gbdt;

pub use self::gbdt::GbdtRegressor;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("unknown hyperparameter '{0}'")]
    UnknownParam(String),
    #[error("invalid value {value} for {name}: {reason}")]
    InvalidParam {
        name: ParamName,
        value: f64,
        reason: &'static str,
    },
    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,
    #[error("sample weights sum to {0}; at least one row needs positive weight")]
    ZeroTotalWeight(f64),
    #[error("estimator needs at least one feature")]
    NoFeatures,
    #[error("model has not been fitted")]
    NotFitted,
}

// ─── Hyperparameter names ───────────────────────────────────────────

/// Tunable hyperparameters. Variant order is alphabetical by name, which is
/// the order grid combinations are enumerated in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ParamName {
    ColsampleBytree,
    LearningRate,
    MaxDepth,
    MinChildWeight,
    NEstimators,
    Subsample,
}

impl ParamName {
    pub const ALL: [ParamName; 6] = [
        ParamName::ColsampleBytree,
        ParamName::LearningRate,
        ParamName::MaxDepth,
        ParamName::MinChildWeight,
        ParamName::NEstimators,
        ParamName::Subsample,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamName::ColsampleBytree => "colsample_bytree",
            ParamName::LearningRate => "learning_rate",
            ParamName::MaxDepth => "max_depth",
            ParamName::MinChildWeight => "min_child_weight",
            ParamName::NEstimators => "n_estimators",
            ParamName::Subsample => "subsample",
        }
    }

    fn is_integral(&self) -> bool {
        matches!(self, ParamName::MaxDepth | ParamName::NEstimators)
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamName::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ModelError::UnknownParam(s.to_string()))
    }
}

// ─── Hyperparameter values ──────────────────────────────────────────

/// Booster hyperparameters. Unset fields take the booster defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HyperParams {
    pub learning_rate: f64,
    pub n_estimators: u32,
    pub max_depth: u32,
    pub min_child_weight: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.3,
            n_estimators: 100,
            max_depth: 6,
            min_child_weight: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
        }
    }
}

impl HyperParams {
    pub fn get(&self, name: ParamName) -> f64 {
        match name {
            ParamName::ColsampleBytree => self.colsample_bytree,
            ParamName::LearningRate => self.learning_rate,
            ParamName::MaxDepth => self.max_depth as f64,
            ParamName::MinChildWeight => self.min_child_weight,
            ParamName::NEstimators => self.n_estimators as f64,
            ParamName::Subsample => self.subsample,
        }
    }

    /// Set one hyperparameter, checking its range.
    pub fn set(&mut self, name: ParamName, value: f64) -> Result<(), ModelError> {
        check_value(name, value)?;
        match name {
            ParamName::ColsampleBytree => self.colsample_bytree = value,
            ParamName::LearningRate => self.learning_rate = value,
            ParamName::MaxDepth => self.max_depth = value as u32,
            ParamName::MinChildWeight => self.min_child_weight = value,
            ParamName::NEstimators => self.n_estimators = value as u32,
            ParamName::Subsample => self.subsample = value,
        }
        Ok(())
    }

    /// Copy with `overrides` applied in order.
    pub fn with(&self, overrides: &[(ParamName, f64)]) -> Result<Self, ModelError> {
        let mut out = self.clone();
        for &(name, value) in overrides {
            out.set(name, value)?;
        }
        Ok(out)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for name in ParamName::ALL {
            check_value(name, self.get(name))?;
        }
        Ok(())
    }
}

fn check_value(name: ParamName, value: f64) -> Result<(), ModelError> {
    let invalid = |reason| ModelError::InvalidParam {
        name,
        value,
        reason,
    };
    if !value.is_finite() {
        return Err(invalid("must be finite"));
    }
    if name.is_integral() && (value.fract() != 0.0 || value < 1.0 || value > u32::MAX as f64) {
        return Err(invalid("must be a positive integer"));
    }
    match name {
        ParamName::LearningRate if value <= 0.0 => Err(invalid("must be positive")),
        ParamName::MinChildWeight if value < 0.0 => Err(invalid("must be non-negative")),
        ParamName::Subsample | ParamName::ColsampleBytree if value <= 0.0 || value > 1.0 => {
            Err(invalid("must be in (0, 1]"))
        }
        _ => Ok(()),
    }
}

// ─── Estimator seam ─────────────────────────────────────────────────

/// A regressor the backtest can configure, fit, predict with and persist.
///
/// Rows are borrowed feature slices; every row must have the feature count
/// the estimator was built with.
pub trait Estimator: Send + Sync + Sized + Serialize + DeserializeOwned {
    fn from_params(params: &HyperParams, feature_count: usize) -> Result<Self, ModelError>;

    fn params(&self) -> &HyperParams;

    /// Fit on `x`/`y`. `weights`, when given, has one entry per row.
    fn fit(&mut self, x: &[&[f64]], y: &[f64], weights: Option<&[f64]>)
        -> Result<(), ModelError>;

    fn predict(&self, x: &[&[f64]]) -> Result<Vec<f64>, ModelError>;
}

/// Shape checks shared by estimator implementations.
pub fn check_training_shape(
    x: &[&[f64]],
    y: &[f64],
    weights: Option<&[f64]>,
    feature_count: usize,
) -> Result<(), ModelError> {
    if x.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    if x.len() != y.len() {
        return Err(ModelError::ShapeMismatch {
            what: "targets",
            expected: x.len(),
            found: y.len(),
        });
    }
    if let Some(w) = weights {
        if w.len() != x.len() {
            return Err(ModelError::ShapeMismatch {
                what: "sample weights",
                expected: x.len(),
                found: w.len(),
            });
        }
        let total: f64 = w.iter().sum();
        if !(total > 0.0 && total.is_finite()) {
            return Err(ModelError::ZeroTotalWeight(total));
        }
    }
    check_rows(x, feature_count)
}

pub fn check_rows(x: &[&[f64]], feature_count: usize) -> Result<(), ModelError> {
    match x.iter().find(|row| row.len() != feature_count) {
        Some(row) => Err(ModelError::ShapeMismatch {
            what: "feature row",
            expected: feature_count,
            found: row.len(),
        }),
        None => Ok(()),
    }
}
