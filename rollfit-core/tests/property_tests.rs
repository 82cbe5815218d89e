//! Property tests for core invariants.
//!
//! Uses proptest to verify:
//! 1. Metric ordering: RMSE >= MAE >= 0 and MdAE >= 0
//! 2. Split counts for rolling windows
//! 3. K-fold test sets partition the rows
//! 4. Month arithmetic is invertible

use proptest::prelude::*;
use rollfit_core::cv::k_fold;
use rollfit_core::domain::Month;
use rollfit_core::metrics::{mae, mdae, rmse};
use rollfit_core::window::{slice_windows, WindowSpec};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_pairs() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    (1usize..200).prop_flat_map(|n| {
        (
            prop::collection::vec(-1e6..1e6_f64, n),
            prop::collection::vec(-1e6..1e6_f64, n),
        )
    })
}

fn arb_month() -> impl Strategy<Value = Month> {
    (1990i32..2040, 1u32..=12).prop_map(|(y, m)| Month::new(y, m).unwrap())
}

// ── 1. Metric ordering ───────────────────────────────────────────────

proptest! {
    #[test]
    fn rmse_dominates_mae((predicted, actual) in arb_pairs()) {
        let r = rmse(&predicted, &actual).unwrap();
        let m = mae(&predicted, &actual).unwrap();
        let d = mdae(&predicted, &actual).unwrap();
        prop_assert!(m >= 0.0);
        prop_assert!(d >= 0.0);
        prop_assert!(r + 1e-9 * r.max(1.0) >= m);
    }
}

// ── 2. Split counts ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn rolling_window_count(n in 0usize..120, w in 1u32..36, start in arb_month()) {
        let months: Vec<Month> = (0..n).map(|i| start.plus_months(i as i64)).collect();
        let splits = slice_windows(&months, 0, None, WindowSpec::Rolling(w));
        let expected = if n > w as usize { n - w as usize } else { 0 };
        prop_assert_eq!(splits.len(), expected);
    }

    #[test]
    fn expanding_window_count(n in 0usize..120) {
        let start = Month::new(2010, 1).unwrap();
        let months: Vec<Month> = (0..n).map(|i| start.plus_months(i as i64)).collect();
        let splits = slice_windows(&months, 0, None, WindowSpec::Expanding);
        prop_assert_eq!(splits.len(), n.saturating_sub(1));
    }
}

// ── 3. K-fold partition ──────────────────────────────────────────────

proptest! {
    #[test]
    fn k_fold_partitions_rows(n in 5usize..300, k in 2usize..6, seed in any::<u64>()) {
        let folds = k_fold(n, k, seed).unwrap();
        prop_assert_eq!(folds.len(), k);
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.iter().copied()).collect();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..n).collect::<Vec<_>>());
        let max = folds.iter().map(|f| f.test.len()).max().unwrap();
        let min = folds.iter().map(|f| f.test.len()).min().unwrap();
        prop_assert!(max - min <= 1);
    }
}

// ── 4. Month arithmetic ──────────────────────────────────────────────

proptest! {
    #[test]
    fn plus_then_minus_is_identity(m in arb_month(), k in -500i64..500) {
        prop_assert_eq!(m.plus_months(k).minus_months(k), m);
        prop_assert_eq!(m.plus_months(k).months_since(m), k);
    }

    #[test]
    fn display_parses_back(m in arb_month()) {
        prop_assert_eq!(m.to_string().parse::<Month>().unwrap(), m);
    }
}
