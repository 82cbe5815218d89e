//! BDD tests for the ensembler.
//!
//! These tests verify:
//! - Equal, inverse-error and argmin blending of persisted models
//! - Skipping of the first month without prior errors
//! - Failure on a missing prior-month error row
//! - An end-to-end run over a filesystem artifact store

use rollfit_core::domain::{Dataset, Month, Observation};
use rollfit_core::metrics::ErrorMetric;
use rollfit_core::model::{
    check_training_shape, Estimator, GbdtRegressor, HyperParams, ModelError, ParamName,
};
use rollfit_core::window::WindowSpec;
use rollfit_runner::artifacts::{load_json, save_estimator};
use rollfit_runner::{
    error_table_key, model_key, run_backtest, run_ensemble, ArtifactStore, BacktestConfig,
    EnsembleConfig, EnsembleError, FsArtifactStore, MemoryArtifactStore, ModelFamily, ResultRow,
    ResultTable,
};
use serde::{Deserialize, Serialize};

// ── Helpers ──

/// Predicts one fixed value for every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Constant {
    params: HyperParams,
    value: f64,
}

impl Constant {
    fn new(value: f64) -> Self {
        Self {
            params: HyperParams::default(),
            value,
        }
    }
}

impl Estimator for Constant {
    fn from_params(params: &HyperParams, _feature_count: usize) -> Result<Self, ModelError> {
        Ok(Self {
            params: params.clone(),
            value: 0.0,
        })
    }

    fn params(&self) -> &HyperParams {
        &self.params
    }

    fn fit(&mut self, x: &[&[f64]], y: &[f64], weights: Option<&[f64]>) -> Result<(), ModelError> {
        check_training_shape(x, y, weights, x.first().map_or(0, |r| r.len()))?;
        self.value = y.iter().sum::<f64>() / y.len() as f64;
        Ok(())
    }

    fn predict(&self, x: &[&[f64]]) -> Result<Vec<f64>, ModelError> {
        Ok(vec![self.value; x.len()])
    }
}

fn m(s: &str) -> Month {
    s.parse().unwrap()
}

fn months(first: &str, n: i64) -> Vec<Month> {
    (0..n).map(|i| m(first).plus_months(i)).collect()
}

fn dataset(months: &[Month], price: f64) -> Dataset {
    let rows = months
        .iter()
        .flat_map(|&month| {
            (0..4).map(move |r| Observation {
                month,
                target: price,
                features: vec![40.0 + r as f64],
            })
        })
        .collect();
    Dataset::new("price", vec!["area".to_string()], rows).unwrap()
}

fn ensemble_config(body: &str) -> EnsembleConfig {
    EnsembleConfig::from_toml(&format!(
        "{body}\n[data]\ntarget = \"price\"\nfeatures = [\"area\"]\n"
    ))
    .expect("valid config")
}

/// Store a constant model for every (window, month) pair.
fn store_models(store: &dyn ArtifactStore, windows: &[(u32, f64)], months: &[Month]) {
    for &(w, value) in windows {
        for &month in months {
            let key = model_key(ModelFamily::NotTuned, WindowSpec::Rolling(w), None, month);
            save_estimator(store, &key, &Constant::new(value)).unwrap();
        }
    }
}

/// Store an MAE error table for window `w` with one row per `(month, mae)`.
fn store_errors(store: &dyn ArtifactStore, experiment: &str, w: u32, rows: &[(Month, f64)]) {
    let rows = rows
        .iter()
        .map(|&(month, mae)| {
            let mut row = ResultRow::empty(month);
            row.metrics.insert(ErrorMetric::Mae, mae);
            row
        })
        .collect();
    let table = ResultTable::new([ErrorMetric::Mae], Vec::<ParamName>::new(), rows);
    store
        .store_results(&error_table_key(experiment, w), &table)
        .unwrap();
}

// ── Scenarios ──

#[test]
fn bdd_scenario_equal_weights_average_the_constituents() {
    // GIVEN models predicting 90 (one month) and 110 (three months) for April
    let all = months("2021-01", 4);
    let data = dataset(&all, 100.0);
    let store = MemoryArtifactStore::new();
    store_models(&store, &[(1, 90.0), (3, 110.0)], &all[3..]);
    let cfg = ensemble_config("window_sizes = [3, 1]\nweighting = \"equal\"");

    // WHEN the ensemble runs
    let table = run_ensemble::<Constant>(&data, &cfg, &store).expect("ensemble should succeed");

    // THEN only April is eligible and the blend hits the target exactly
    assert_eq!(table.len(), 1);
    let row = &table.rows()[0];
    assert_eq!(row.month, m("2021-04"));
    for metric in ErrorMetric::ALL {
        assert!(row.metric(metric).unwrap().abs() < 1e-9);
    }
}

#[test]
fn bdd_scenario_inverse_error_weights_favour_last_months_winner() {
    // GIVEN last month's errors of 1 (one month) and 3 (three months)
    let all = months("2021-01", 5);
    let data = dataset(&all, 95.0);
    let store = MemoryArtifactStore::new();
    store_models(&store, &[(1, 90.0), (3, 110.0)], &all[3..]);
    store_errors(&store, "A", 1, &[(all[2], 1.0), (all[3], 1.0)]);
    store_errors(&store, "A", 3, &[(all[2], 3.0), (all[3], 3.0)]);
    let cfg = ensemble_config(
        "window_sizes = [1, 3]\nweighting = \"inverse_error\"\nexperiment = \"A\"\nmetrics = [\"mae\"]\nsave_ensembles = true",
    );

    // WHEN the ensemble runs
    let table = run_ensemble::<Constant>(&data, &cfg, &store).unwrap();

    // THEN the weights are [0.75, 0.25] and the blend is 95
    assert_eq!(table.len(), 2);
    for row in table.rows() {
        assert!(row.metric(ErrorMetric::Mae).unwrap() < 1e-9);
    }

    // AND each month's ensemble is persisted as its list of models
    let saved: Vec<Constant> =
        load_json(&store, "not_tuned/winsize1-3_unequalw_sampleall_2021-04.json").unwrap();
    assert_eq!(saved, vec![Constant::new(90.0), Constant::new(110.0)]);
}

#[test]
fn bdd_scenario_argmin_selects_the_best_constituent() {
    // GIVEN the three-month model had the smaller error last month
    let all = months("2021-01", 4);
    let data = dataset(&all, 110.0);
    let store = MemoryArtifactStore::new();
    store_models(&store, &[(1, 90.0), (3, 110.0)], &all[3..]);
    store_errors(&store, "B", 1, &[(all[2], 3.0)]);
    store_errors(&store, "B", 3, &[(all[2], 1.0)]);
    let cfg = ensemble_config(
        "window_sizes = [1, 3]\nweighting = \"argmin\"\nexperiment = \"B\"\nmetrics = [\"rmse\", \"mae\"]",
    );

    // WHEN the ensemble runs with only MAE errors on record
    let err = run_ensemble::<Constant>(&data, &cfg, &store).unwrap_err();

    // THEN the missing RMSE value is reported
    assert!(matches!(
        err,
        EnsembleError::MissingErrorValue {
            metric: ErrorMetric::Rmse,
            ..
        }
    ));

    // WHEN only MAE is requested
    let cfg = ensemble_config(
        "window_sizes = [1, 3]\nweighting = \"argmin\"\nexperiment = \"B\"\nmetrics = [\"mae\"]",
    );
    let table = run_ensemble::<Constant>(&data, &cfg, &store).unwrap();

    // THEN the three-month model alone is used
    assert!(table.rows()[0].metric(ErrorMetric::Mae).unwrap() < 1e-9);
}

#[test]
fn bdd_scenario_first_month_without_prior_errors_is_skipped() {
    // GIVEN error tables that start in April
    let all = months("2021-01", 5);
    let data = dataset(&all, 95.0);
    let store = MemoryArtifactStore::new();
    store_models(&store, &[(1, 90.0), (3, 110.0)], &all[3..]);
    store_errors(&store, "C", 1, &[(all[3], 1.0)]);
    store_errors(&store, "C", 3, &[(all[3], 3.0)]);
    let cfg = ensemble_config(
        "window_sizes = [1, 3]\nweighting = \"inverse_error\"\nexperiment = \"C\"\nmetrics = [\"mae\"]",
    );

    // WHEN the ensemble runs
    let table = run_ensemble::<Constant>(&data, &cfg, &store).unwrap();

    // THEN April is kept as an empty row and May is scored
    assert_eq!(table.len(), 2);
    assert_eq!(table.metric(m("2021-04"), ErrorMetric::Mae), None);
    assert!(table.metric(m("2021-05"), ErrorMetric::Mae).unwrap() < 1e-9);
}

#[test]
fn bdd_scenario_missing_later_error_row_fails() {
    // GIVEN error tables with March only
    let all = months("2021-01", 5);
    let data = dataset(&all, 95.0);
    let store = MemoryArtifactStore::new();
    store_models(&store, &[(1, 90.0), (3, 110.0)], &all[3..]);
    store_errors(&store, "D", 1, &[(all[2], 1.0)]);
    store_errors(&store, "D", 3, &[(all[2], 3.0)]);
    let cfg = ensemble_config(
        "window_sizes = [1, 3]\nweighting = \"inverse_error\"\nexperiment = \"D\"\nmetrics = [\"mae\"]",
    );

    // WHEN the ensemble reaches May
    let err = run_ensemble::<Constant>(&data, &cfg, &store).unwrap_err();

    // THEN the missing April row is reported
    match err {
        EnsembleError::MissingErrorRow { month, window } => {
            assert_eq!(month, m("2021-04"));
            assert_eq!(window, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn bdd_scenario_backtest_then_ensemble_on_disk() {
    // GIVEN untuned backtests for window sizes 1 and 2 persisted to disk
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path()).unwrap();
    let data = dataset(&months("2020-01", 4), 100.0);
    for w in [1u32, 2] {
        let cfg = BacktestConfig::from_toml(&format!(
            "window = {w}\nsave_models = true\nresults_key = \"{}\"\n[data]\ntarget = \"price\"\nfeatures = [\"area\"]\n",
            error_table_key("E", w)
        ))
        .unwrap();
        run_backtest::<GbdtRegressor>(&data, &cfg, Some(&store)).unwrap();
    }
    assert!(dir
        .path()
        .join("not_tuned/winsize2_sampleall_2020-03.json")
        .exists());
    assert!(dir.path().join("expE1_notuning.csv").exists());

    // WHEN the ensemble blends them with equal weights
    let cfg = ensemble_config(
        "window_sizes = [1, 2]\nweighting = \"equal\"\nexperiment = \"E\"\nresults_key = \"ensemble_equal\"",
    );
    let table = run_ensemble::<GbdtRegressor>(&data, &cfg, &store).unwrap();

    // THEN March and April are scored with zero error
    let scored: Vec<Month> = table.rows().iter().map(|r| r.month).collect();
    assert_eq!(scored, vec![m("2020-03"), m("2020-04")]);
    for row in table.rows() {
        assert_eq!(row.metric(ErrorMetric::Rmse), Some(0.0));
    }

    // AND the result table is written next to the models
    let reread = store.load_results("ensemble_equal").unwrap();
    assert_eq!(reread.rows().len(), 2);
}
