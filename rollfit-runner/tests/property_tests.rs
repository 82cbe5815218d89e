//! Property tests for runner invariants.
//!
//! Uses proptest to verify:
//! 1. Inverse-error and argmin weights sum to 1
//! 2. Equal-weight blends are the arithmetic mean
//! 3. Grid size matches the enumerated combinations

use proptest::prelude::*;
use rollfit_core::model::ParamName;
use rollfit_runner::{argmin_weights, ensemble_predict, equal_weights, inverse_error_weights, ParamGrid};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_errors() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1e-3..1e4_f64, 1..8)
}

// ── 1. Weights sum to one ────────────────────────────────────────────

proptest! {
    #[test]
    fn inverse_error_weights_sum_to_one(errors in arb_errors()) {
        let weights = inverse_error_weights(&errors).unwrap();
        prop_assert_eq!(weights.len(), errors.len());
        prop_assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        prop_assert!(weights.iter().all(|w| *w > 0.0));
    }

    #[test]
    fn argmin_weights_are_one_hot(errors in arb_errors()) {
        let weights = argmin_weights(&errors).unwrap();
        prop_assert_eq!(weights.iter().filter(|w| **w == 1.0).count(), 1);
        prop_assert_eq!(weights.iter().sum::<f64>(), 1.0);
    }
}

// ── 2. Equal blend ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn equal_blend_is_the_mean(
        predictions in prop::collection::vec(prop::collection::vec(0.0..1e6_f64, 3), 1..6)
    ) {
        let weights = equal_weights(predictions.len()).unwrap();
        let blended = ensemble_predict(&predictions, &weights).unwrap();
        for (row, value) in blended.iter().enumerate() {
            let mean = predictions.iter().map(|p| p[row]).sum::<f64>() / predictions.len() as f64;
            prop_assert!((value - mean).abs() <= 1e-9 * mean.abs().max(1.0));
        }
    }
}

// ── 3. Grid size ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn grid_size_matches_combinations(
        depths in prop::collection::vec(1u32..10, 0..4),
        rates in prop::collection::vec(0.01..1.0_f64, 0..4),
    ) {
        let grid = ParamGrid::new()
            .with(ParamName::MaxDepth, depths.iter().map(|&d| d as f64).collect())
            .with(ParamName::LearningRate, rates);
        prop_assert_eq!(grid.size(), grid.combinations().len());
    }
}
