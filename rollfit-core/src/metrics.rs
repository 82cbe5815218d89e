//! Error metrics: pure functions over paired (predicted, actual) samples.
//!
//! Every metric takes two equal-length, non-empty slices and returns a scalar.
//! MAPE divides by the actual value and is not guarded against zero actuals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The error metrics a backtest can report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMetric {
    Mae,
    Mape,
    Mdae,
    Rmse,
}

impl ErrorMetric {
    pub const ALL: [ErrorMetric; 4] = [
        ErrorMetric::Rmse,
        ErrorMetric::Mae,
        ErrorMetric::Mape,
        ErrorMetric::Mdae,
    ];

    /// Column / config name of the metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorMetric::Rmse => "rmse",
            ErrorMetric::Mae => "mae",
            ErrorMetric::Mape => "mape",
            ErrorMetric::Mdae => "mdae",
        }
    }

    pub fn compute(&self, predicted: &[f64], actual: &[f64]) -> Result<f64, MetricError> {
        match self {
            ErrorMetric::Rmse => rmse(predicted, actual),
            ErrorMetric::Mae => mae(predicted, actual),
            ErrorMetric::Mape => mape(predicted, actual),
            ErrorMetric::Mdae => mdae(predicted, actual),
        }
    }
}

impl fmt::Display for ErrorMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorMetric {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rmse" => Ok(ErrorMetric::Rmse),
            "mae" => Ok(ErrorMetric::Mae),
            "mape" => Ok(ErrorMetric::Mape),
            "mdae" => Ok(ErrorMetric::Mdae),
            _ => Err(MetricError::UnknownMetric(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("unknown error metric '{0}' (valid: rmse, mae, mape, mdae)")]
    UnknownMetric(String),
    #[error("length mismatch: {predicted} predictions vs {actual} actual values")]
    LengthMismatch { predicted: usize, actual: usize },
    #[error("cannot compute an error metric on an empty sample")]
    Empty,
}

fn check(predicted: &[f64], actual: &[f64]) -> Result<(), MetricError> {
    if predicted.len() != actual.len() {
        return Err(MetricError::LengthMismatch {
            predicted: predicted.len(),
            actual: actual.len(),
        });
    }
    if predicted.is_empty() {
        return Err(MetricError::Empty);
    }
    Ok(())
}

fn abs_errors<'a>(predicted: &'a [f64], actual: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    predicted.iter().zip(actual).map(|(p, a)| (p - a).abs())
}

/// Mean squared error.
pub fn mse(predicted: &[f64], actual: &[f64]) -> Result<f64, MetricError> {
    check(predicted, actual)?;
    let sum: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a) * (p - a))
        .sum();
    Ok(sum / predicted.len() as f64)
}

/// Root mean squared error.
pub fn rmse(predicted: &[f64], actual: &[f64]) -> Result<f64, MetricError> {
    Ok(mse(predicted, actual)?.sqrt())
}

/// Mean absolute error.
pub fn mae(predicted: &[f64], actual: &[f64]) -> Result<f64, MetricError> {
    check(predicted, actual)?;
    Ok(abs_errors(predicted, actual).sum::<f64>() / predicted.len() as f64)
}

/// Mean absolute percentage error, as a fraction (0.05 = 5%).
pub fn mape(predicted: &[f64], actual: &[f64]) -> Result<f64, MetricError> {
    check(predicted, actual)?;
    let sum: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| ((a - p) / a).abs())
        .sum();
    Ok(sum / predicted.len() as f64)
}

/// Median absolute error. Even-length samples average the two middle errors.
pub fn mdae(predicted: &[f64], actual: &[f64]) -> Result<f64, MetricError> {
    check(predicted, actual)?;
    let mut errors: Vec<f64> = abs_errors(predicted, actual).collect();
    errors.sort_by(|a, b| a.total_cmp(b));
    let mid = errors.len() / 2;
    if errors.len() % 2 == 0 {
        Ok((errors[mid - 1] + errors[mid]) / 2.0)
    } else {
        Ok(errors[mid])
    }
}
