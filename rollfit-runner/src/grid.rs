//! Hyperparameter grids and the refinement step between tuning rounds.

use std::collections::BTreeMap;

use rollfit_core::model::ParamName;
use serde::{Deserialize, Serialize};

/// One tuning round: candidate values per hyperparameter.
///
/// Keys iterate in [`ParamName`] order, so combinations are enumerated in
/// hyperparameter-name order with the last name varying fastest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamGrid(BTreeMap<ParamName, Vec<f64>>);

/// A single candidate: one value per hyperparameter in the grid.
pub type Combination = Vec<(ParamName, f64)>;

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, replacing any existing candidates for `name`.
    pub fn with(mut self, name: ParamName, values: Vec<f64>) -> Self {
        self.0.insert(name, values);
        self
    }

    pub fn insert(&mut self, name: ParamName, values: Vec<f64>) {
        self.0.insert(name, values);
    }

    pub fn get(&self, name: ParamName) -> Option<&[f64]> {
        self.0.get(&name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = ParamName> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamName, &[f64])> + '_ {
        self.0.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First hyperparameter whose candidate list is empty.
    pub fn first_empty(&self) -> Option<ParamName> {
        self.0.iter().find(|(_, v)| v.is_empty()).map(|(k, _)| *k)
    }

    /// Number of combinations (0 if any candidate list is empty, 1 for an empty grid).
    pub fn size(&self) -> usize {
        self.0.values().map(Vec::len).product()
    }

    /// Cartesian product of all candidate lists.
    pub fn combinations(&self) -> Vec<Combination> {
        let mut out: Vec<Combination> = vec![Vec::new()];
        for (&name, values) in &self.0 {
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |&v| {
                        let mut next = prefix.clone();
                        next.push((name, v));
                        next
                    })
                })
                .collect();
        }
        out
    }
}

impl FromIterator<(ParamName, Vec<f64>)> for ParamGrid {
    fn from_iter<I: IntoIterator<Item = (ParamName, Vec<f64>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Grid for the next round: `next` with every accumulated winner pinned.
///
/// Winners override the round's own candidates for the same hyperparameter.
pub fn refine_grid(best: &BTreeMap<ParamName, f64>, next: &ParamGrid) -> ParamGrid {
    let mut grid = next.clone();
    for (&name, &value) in best {
        grid.insert(name, vec![value]);
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_name_varies_fastest() {
        let grid = ParamGrid::new()
            .with(ParamName::MaxDepth, vec![3.0, 6.0])
            .with(ParamName::LearningRate, vec![0.1, 0.3]);
        let combos = grid.combinations();
        assert_eq!(
            combos,
            vec![
                vec![(ParamName::LearningRate, 0.1), (ParamName::MaxDepth, 3.0)],
                vec![(ParamName::LearningRate, 0.1), (ParamName::MaxDepth, 6.0)],
                vec![(ParamName::LearningRate, 0.3), (ParamName::MaxDepth, 3.0)],
                vec![(ParamName::LearningRate, 0.3), (ParamName::MaxDepth, 6.0)],
            ]
        );
        assert_eq!(grid.size(), 4);
    }

    #[test]
    fn empty_grid_has_one_empty_combination() {
        assert_eq!(ParamGrid::new().combinations(), vec![Vec::new()]);
    }

    #[test]
    fn empty_candidate_list_yields_nothing() {
        let grid = ParamGrid::new()
            .with(ParamName::MaxDepth, vec![3.0])
            .with(ParamName::Subsample, vec![]);
        assert!(grid.combinations().is_empty());
        assert_eq!(grid.first_empty(), Some(ParamName::Subsample));
    }

    #[test]
    fn refine_pins_winners_and_keeps_new_names() {
        let best = BTreeMap::from([(ParamName::MaxDepth, 6.0)]);
        let next = ParamGrid::new()
            .with(ParamName::MaxDepth, vec![2.0, 4.0])
            .with(ParamName::NEstimators, vec![50.0, 100.0]);
        let refined = refine_grid(&best, &next);
        assert_eq!(refined.get(ParamName::MaxDepth), Some(&[6.0][..]));
        assert_eq!(refined.get(ParamName::NEstimators), Some(&[50.0, 100.0][..]));
        // input is untouched
        assert_eq!(next.get(ParamName::MaxDepth), Some(&[2.0, 4.0][..]));
    }

    #[test]
    fn deserializes_from_toml_table() {
        let grid: ParamGrid = toml::from_str("max_depth = [3, 6]\nlearning_rate = [0.1]").unwrap();
        assert_eq!(grid.get(ParamName::MaxDepth), Some(&[3.0, 6.0][..]));
        assert!(toml::from_str::<ParamGrid>("gamma = [0.1]").is_err());
    }
}
