//! Backtest and ensemble configuration, loaded from TOML.
//!
//! Configs are plain immutable values: deserialize, `validate()`, then pass
//! by reference into the loops. Unknown keys, unknown metric names and
//! unknown hyperparameters are rejected at parse time.

use std::path::Path;

use rollfit_core::cv::{CvError, CvStrategy};
use rollfit_core::data::{load_dataset, DataColumns, DataError};
use rollfit_core::domain::{Dataset, Month};
use rollfit_core::metrics::ErrorMetric;
use rollfit_core::model::{HyperParams, ModelError, ParamName};
use rollfit_core::window::{WindowError, WindowSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::ModelFamily;
use crate::grid::ParamGrid;

pub const DEFAULT_SEED: u64 = 789;
pub const DEFAULT_TEST_FRACTION: f64 = 0.3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("window: {0}")]
    Window(#[from] WindowError),

    #[error("cv: {0}")]
    Cv(#[from] CvError),

    #[error("hyperparameters: {0}")]
    Params(#[from] ModelError),

    #[error("at least one error metric is required")]
    NoMetrics,

    #[error("grid search needs at least one round")]
    EmptyGrid,

    #[error("round {round}: no candidate values for {param}")]
    EmptyCandidates { round: usize, param: ParamName },

    #[error("grid_workers must be at least 1")]
    ZeroWorkers,

    #[error("sample size must be at least 1")]
    ZeroSample,

    #[error("test_fraction must be in (0, 1), got {0}")]
    TestFraction(f64),

    #[error("recency weights cannot be combined with a random split")]
    WeightsWithRandomSplit,

    #[error("recency weights need every training window to span at least two months")]
    SingleMonthWeights,

    #[error("ensemble needs at least one window size")]
    NoWindowSizes,

    #[error("ensemble window sizes must be at least 1")]
    ZeroWindowSize,
}

fn default_metrics() -> Vec<ErrorMetric> {
    ErrorMetric::ALL.to_vec()
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_test_fraction() -> f64 {
    DEFAULT_TEST_FRACTION
}

fn validate_metrics(metrics: &[ErrorMetric]) -> Result<(), ConfigError> {
    if metrics.is_empty() {
        return Err(ConfigError::NoMetrics);
    }
    Ok(())
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

// ─── Data ───────────────────────────────────────────────────────────

/// Input columns plus an optional inclusive month range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(flatten)]
    pub columns: DataColumns,
    #[serde(default)]
    pub from: Option<Month>,
    #[serde(default)]
    pub to: Option<Month>,
}

impl DataConfig {
    /// Load the file and apply the month range.
    pub fn load(&self, path: &Path) -> Result<Dataset, DataError> {
        let dataset = load_dataset(path, &self.columns)?;
        Ok(if self.from.is_some() || self.to.is_some() {
            dataset.restrict(self.from, self.to)
        } else {
            dataset
        })
    }
}

// ─── Backtest ───────────────────────────────────────────────────────

/// Recency weighting of training rows by months since the earliest month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleWeighting {
    Linear,
    Quadratic,
}

impl SampleWeighting {
    pub fn weight(&self, months_since_start: i64) -> f64 {
        let d = months_since_start as f64;
        match self {
            SampleWeighting::Linear => d,
            SampleWeighting::Quadratic => d * d,
        }
    }
}

/// How train and test rows are separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Rolling or expanding monthly windows.
    #[default]
    Window,
    /// One seeded random train/test split over the whole dataset.
    Random,
}

/// Where each month's hyperparameters come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case", deny_unknown_fields)]
pub enum TuningMode {
    /// Fixed hyperparameters for every month.
    None {
        #[serde(default)]
        params: HyperParams,
    },
    /// Reuse the hyperparameters of a previously persisted model.
    FromArtifact { key: String },
    /// Multi-round grid search inside every training window.
    Grid {
        #[serde(default)]
        base: HyperParams,
        rounds: Vec<ParamGrid>,
        #[serde(default)]
        cv: CvStrategy,
        #[serde(default)]
        grid_workers: Option<usize>,
    },
}

impl Default for TuningMode {
    fn default() -> Self {
        TuningMode::None {
            params: HyperParams::default(),
        }
    }
}

impl TuningMode {
    pub fn family(&self) -> ModelFamily {
        match self {
            TuningMode::Grid {
                cv: CvStrategy::RandomCv { .. },
                ..
            } => ModelFamily::TunedRandomCv,
            TuningMode::Grid {
                cv: CvStrategy::TimeSeriesSplit { .. },
                ..
            } => ModelFamily::TunedTimeSeriesSplit,
            _ => ModelFamily::NotTuned,
        }
    }

    /// Every hyperparameter named in any grid round, sorted.
    pub fn tuned_params(&self) -> Vec<ParamName> {
        let mut names: Vec<ParamName> = match self {
            TuningMode::Grid { rounds, .. } => rounds.iter().flat_map(|r| r.names()).collect(),
            _ => Vec::new(),
        };
        names.sort_unstable();
        names.dedup();
        names
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            TuningMode::None { params } => params.validate()?,
            TuningMode::FromArtifact { .. } => {}
            TuningMode::Grid {
                base,
                rounds,
                cv,
                grid_workers,
            } => {
                base.validate()?;
                cv.validate()?;
                if rounds.is_empty() {
                    return Err(ConfigError::EmptyGrid);
                }
                for (round, grid) in rounds.iter().enumerate() {
                    if let Some(param) = grid.first_empty() {
                        return Err(ConfigError::EmptyCandidates { round, param });
                    }
                    for (name, values) in grid.iter() {
                        for &v in values {
                            HyperParams::default().set(name, v)?;
                        }
                    }
                }
                if *grid_workers == Some(0) {
                    return Err(ConfigError::ZeroWorkers);
                }
            }
        }
        Ok(())
    }
}

/// Everything one backtest run needs besides the data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestConfig {
    pub data: DataConfig,
    pub window: WindowSpec,
    #[serde(default)]
    pub starting_offset: usize,
    #[serde(default)]
    pub ending_offset: Option<usize>,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<ErrorMetric>,
    #[serde(default)]
    pub weighting: Option<SampleWeighting>,
    #[serde(default)]
    pub tuning: TuningMode,
    /// Number of rows to sample (seeded) before slicing. `None` uses every row.
    #[serde(default)]
    pub sample: Option<usize>,
    #[serde(default)]
    pub split: SplitMode,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Persist every fitted model through the artifact store.
    #[serde(default)]
    pub save_models: bool,
    /// Persist the result table under this key.
    #[serde(default)]
    pub results_key: Option<String>,
}

impl BacktestConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        validate_metrics(&self.metrics)?;
        self.tuning.validate()?;
        if self.sample == Some(0) {
            return Err(ConfigError::ZeroSample);
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ConfigError::TestFraction(self.test_fraction));
        }
        if self.weighting.is_some() {
            match (self.split, self.window) {
                (SplitMode::Random, _) => return Err(ConfigError::WeightsWithRandomSplit),
                (SplitMode::Window, WindowSpec::Rolling(w)) if w < 2 => {
                    return Err(ConfigError::SingleMonthWeights)
                }
                (SplitMode::Window, WindowSpec::Expanding) if self.starting_offset < 2 => {
                    return Err(ConfigError::SingleMonthWeights)
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Requested metrics, sorted and deduplicated.
    pub fn sorted_metrics(&self) -> Vec<ErrorMetric> {
        sorted(&self.metrics)
    }
}

fn sorted(metrics: &[ErrorMetric]) -> Vec<ErrorMetric> {
    let mut out = metrics.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

// ─── Ensemble ───────────────────────────────────────────────────────

/// How constituent predictions are blended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingMode {
    /// Arithmetic mean.
    Equal,
    /// Inverse of last month's normalized error.
    InverseError,
    /// One-hot on last month's smallest error.
    Argmin,
}

impl WeightingMode {
    /// Label used in ensemble artifact keys.
    pub fn label(&self) -> &'static str {
        match self {
            WeightingMode::Equal => "equalw",
            WeightingMode::InverseError => "unequalw",
            WeightingMode::Argmin => "argminw",
        }
    }

    pub fn needs_prior_errors(&self) -> bool {
        !matches!(self, WeightingMode::Equal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsembleConfig {
    pub data: DataConfig,
    pub window_sizes: Vec<u32>,
    pub weighting: WeightingMode,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<ErrorMetric>,
    #[serde(default)]
    pub starting_offset: usize,
    #[serde(default)]
    pub ending_offset: Option<usize>,
    /// Sample size the constituent models were trained with.
    #[serde(default)]
    pub sample: Option<usize>,
    /// Which persisted models to combine.
    #[serde(default)]
    pub models: ModelFamily,
    /// Experiment id in the error-table keys (`exp{experiment}{W}_notuning`).
    #[serde(default)]
    pub experiment: String,
    /// Persist each month's ensemble through the artifact store.
    #[serde(default)]
    pub save_ensembles: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Persist the ensemble result table under this key.
    #[serde(default)]
    pub results_key: Option<String>,
}

impl EnsembleConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_metrics(&self.metrics)?;
        if self.window_sizes.is_empty() {
            return Err(ConfigError::NoWindowSizes);
        }
        if self.window_sizes.contains(&0) {
            return Err(ConfigError::ZeroWindowSize);
        }
        if self.sample == Some(0) {
            return Err(ConfigError::ZeroSample);
        }
        Ok(())
    }

    pub fn sorted_metrics(&self) -> Vec<ErrorMetric> {
        sorted(&self.metrics)
    }

    /// Window sizes ascending, without duplicates.
    pub fn sorted_window_sizes(&self) -> Vec<u32> {
        let mut out = self.window_sizes.clone();
        out.sort_unstable();
        out.dedup();
        out
    }
}
