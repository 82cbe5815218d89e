//! Gradient-boosted regression trees backed by the `gbdt` crate.
//!
//! Hyperparameters map onto the booster as:
//!
//! | name               | booster setting             |
//! |--------------------|-----------------------------|
//! | `learning_rate`    | shrinkage                   |
//! | `n_estimators`     | iterations                  |
//! | `max_depth`        | max depth                   |
//! | `min_child_weight` | min rows per leaf, floored  |
//! | `subsample`        | data sample ratio           |
//! | `colsample_bytree` | feature sample ratio        |
//!
//! `min_child_weight` changes meaning here: the booster has no hessian
//! threshold, so the value becomes a minimum row count per leaf (at least 1).
//!
//! Boosting starts from the weighted mean target, which the booster computes
//! as its bias when no per-row initial guess is enabled. The booster computes
//! in `f32`; inputs and outputs are converted at the edge.

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{check_rows, check_training_shape, Estimator, HyperParams, ModelError};

const LOSS: &str = "SquaredError";

/// Squared-error gradient-boosted regressor.
#[derive(Serialize, Deserialize)]
pub struct GbdtRegressor {
    params: HyperParams,
    feature_count: usize,
    booster: Option<GBDT>,
}

impl fmt::Debug for GbdtRegressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GbdtRegressor")
            .field("params", &self.params)
            .field("feature_count", &self.feature_count)
            .field("fitted", &self.booster.is_some())
            .finish()
    }
}

impl GbdtRegressor {
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn is_fitted(&self) -> bool {
        self.booster.is_some()
    }

    fn booster_config(&self) -> Config {
        let p = &self.params;
        let mut cfg = Config::new();
        cfg.set_feature_size(self.feature_count);
        cfg.set_max_depth(p.max_depth);
        cfg.set_iterations(p.n_estimators as usize);
        cfg.set_shrinkage(p.learning_rate as f32);
        cfg.set_loss(LOSS);
        cfg.set_min_leaf_size(p.min_child_weight.floor().max(1.0) as usize);
        cfg.set_data_sample_ratio(p.subsample);
        cfg.set_feature_sample_ratio(p.colsample_bytree);
        cfg.enabled_initial_guess(false);
        cfg.set_training_optimization_level(2);
        cfg.set_debug(false);
        cfg
    }
}

fn to_f32(row: &[f64]) -> Vec<f32> {
    row.iter().map(|&v| v as f32).collect()
}

impl Estimator for GbdtRegressor {
    fn from_params(params: &HyperParams, feature_count: usize) -> Result<Self, ModelError> {
        params.validate()?;
        if feature_count == 0 {
            return Err(ModelError::NoFeatures);
        }
        Ok(Self {
            params: params.clone(),
            feature_count,
            booster: None,
        })
    }

    fn params(&self) -> &HyperParams {
        &self.params
    }

    fn fit(
        &mut self,
        x: &[&[f64]],
        y: &[f64],
        weights: Option<&[f64]>,
    ) -> Result<(), ModelError> {
        check_training_shape(x, y, weights, self.feature_count)?;

        let mut train: DataVec = x
            .iter()
            .zip(y)
            .enumerate()
            .map(|(i, (row, &label))| {
                let weight = weights.map_or(1.0, |w| w[i]);
                Data::new_training_data(to_f32(row), weight as f32, label as f32, None)
            })
            .collect();

        let mut booster = GBDT::new(&self.booster_config());
        booster.fit(&mut train);
        self.booster = Some(booster);
        Ok(())
    }

    fn predict(&self, x: &[&[f64]]) -> Result<Vec<f64>, ModelError> {
        let booster = self.booster.as_ref().ok_or(ModelError::NotFitted)?;
        check_rows(x, self.feature_count)?;
        if x.is_empty() {
            return Ok(Vec::new());
        }
        let test: DataVec = x
            .iter()
            .map(|row| Data::new_test_data(to_f32(row), None))
            .collect();
        Ok(booster.predict(&test).into_iter().map(f64::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> HyperParams {
        HyperParams {
            n_estimators: 20,
            max_depth: 3,
            ..HyperParams::default()
        }
    }

    #[test]
    fn constant_target_predicts_constant() {
        let rows: Vec<Vec<f64>> = (0..20).map(|_| vec![1.0, 2.0]).collect();
        let x: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
        let y = vec![100.0; 20];

        let mut model = GbdtRegressor::from_params(&small_params(), 2).unwrap();
        model.fit(&x, &y, None).unwrap();
        let preds = model.predict(&x[..3]).unwrap();
        assert_eq!(preds, vec![100.0; 3]);
    }

    #[test]
    fn low_learning_rate_does_not_shrink_toward_zero() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let x: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
        let y = vec![250_000.0; 30];
        let weights: Vec<f64> = (0..30).map(|i| (i / 10) as f64 + 1.0).collect();
        let params = HyperParams {
            learning_rate: 0.05,
            n_estimators: 50,
            ..HyperParams::default()
        };

        let mut model = GbdtRegressor::from_params(&params, 2).unwrap();
        model.fit(&x, &y, Some(&weights)).unwrap();
        assert_eq!(model.predict(&x[..2]).unwrap(), vec![250_000.0; 2]);
    }

    #[test]
    fn min_child_weight_floors_to_a_leaf_size() {
        let leaf_size = |min_child_weight| {
            let params = HyperParams {
                min_child_weight,
                ..HyperParams::default()
            };
            let model = GbdtRegressor::from_params(&params, 1).unwrap();
            model.booster_config().min_leaf_size
        };
        assert_eq!(leaf_size(0.4), 1);
        assert_eq!(leaf_size(3.7), 3);
    }

    #[test]
    fn learns_a_step_function() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
        let x: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 10.0 } else { 50.0 }).collect();

        let mut model = GbdtRegressor::from_params(&small_params(), 1).unwrap();
        model.fit(&x, &y, None).unwrap();
        let low = [5.0];
        let high = [35.0];
        let preds = model.predict(&[&low[..], &high[..]]).unwrap();
        assert!(preds[0] < preds[1]);
    }

    #[test]
    fn predict_before_fit_fails() {
        let model = GbdtRegressor::from_params(&HyperParams::default(), 1).unwrap();
        let row = [1.0];
        assert_eq!(model.predict(&[&row[..]]), Err(ModelError::NotFitted));
    }

    #[test]
    fn wrong_feature_count_rejected() {
        let mut model = GbdtRegressor::from_params(&small_params(), 2).unwrap();
        let row = [1.0];
        let err = model.fit(&[&row[..]], &[1.0], None).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn zero_features_rejected() {
        assert_eq!(
            GbdtRegressor::from_params(&HyperParams::default(), 0).unwrap_err(),
            ModelError::NoFeatures
        );
    }

    #[test]
    fn fitted_model_survives_json() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let x: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
        let y: Vec<f64> = (0..10).map(|i| i as f64 * 2.0).collect();
        let mut model = GbdtRegressor::from_params(&small_params(), 1).unwrap();
        model.fit(&x, &y, None).unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let back: GbdtRegressor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.params(), model.params());
        assert_eq!(back.predict(&x).unwrap(), model.predict(&x).unwrap());
    }
}
