//! RollFit Runner: backtest orchestration, tuning, artifacts and ensembling.
//!
//! This crate builds on `rollfit-core` to provide:
//! - TOML run configuration with validation
//! - Sequential and pooled rolling-window backtest loops
//! - Multi-round grid search over k-fold or time-series CV
//! - Result tables (CSV) and an artifact store for models and tables
//! - Post-hoc ensembles of per-window-size models

pub mod artifacts;
pub mod backtest;
pub mod config;
pub mod ensemble;
pub mod grid;
pub mod parallel;
pub mod result;
pub mod tuner;

pub use artifacts::{
    ensemble_key, error_table_key, model_key, ArtifactError, ArtifactStore, FsArtifactStore,
    MemoryArtifactStore, ModelFamily,
};
pub use backtest::{recency_weights, run_backtest, BacktestError};
pub use config::{
    BacktestConfig, ConfigError, DataConfig, EnsembleConfig, SampleWeighting, SplitMode,
    TuningMode, WeightingMode,
};
pub use ensemble::{
    argmin_weights, ensemble_predict, equal_weights, inverse_error_weights, run_ensemble,
    EnsembleError,
};
pub use grid::{refine_grid, ParamGrid};
pub use parallel::{default_workers, run_backtest_parallel};
pub use result::{ResultError, ResultRow, ResultTable};
pub use tuner::{tune, TuneError, TuningOutcome};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
        assert_send::<EnsembleConfig>();
        assert_sync::<EnsembleConfig>();
    }

    #[test]
    fn result_table_is_send_sync() {
        assert_send::<ResultTable>();
        assert_sync::<ResultTable>();
    }

    #[test]
    fn stores_are_send_sync() {
        assert_send::<FsArtifactStore>();
        assert_sync::<FsArtifactStore>();
        assert_send::<MemoryArtifactStore>();
        assert_sync::<MemoryArtifactStore>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<BacktestError>();
        assert_sync::<BacktestError>();
        assert_send::<EnsembleError>();
        assert_sync::<EnsembleError>();
    }
}
