//! RollFit Core: month-indexed datasets, error metrics, window slicing,
//! cross-validation folds and the estimator seam.
//!
//! This crate holds everything the backtest needs that does not depend on
//! configuration or persistence:
//! - Domain types (months, listing datasets)
//! - CSV and Parquet ingestion
//! - RMSE / MAE / MAPE / MdAE
//! - Rolling and expanding train/test window slicing
//! - K-fold and time-series fold generation
//! - Hyperparameters, the `Estimator` trait and a gradient-boosted regressor
//! - Deterministic per-month seeds

pub mod cv;
pub mod data;
pub mod domain;
pub mod metrics;
pub mod model;
pub mod rng;
pub mod window;

pub use domain::{Dataset, Month};
pub use metrics::ErrorMetric;
pub use model::{Estimator, GbdtRegressor, HyperParams, ParamName};
pub use window::{slice_windows, WindowSpec, WindowSplit};
