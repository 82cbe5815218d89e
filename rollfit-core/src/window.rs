//! Window slicer: which months train each held-out test month.
//!
//! Months are calendar months from [`Dataset::unique_months`](crate::domain::Dataset::unique_months).
//! A rolling window of `W` trains on `[test - W months, test)`; an expanding
//! window trains on everything before the test month. The starting offset
//! only picks which test months are evaluated, the training slice always
//! looks back into the full history.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::domain::Month;

#[derive(Debug, Error, PartialEq)]
pub enum WindowError {
    #[error("rolling window size must be at least 1 month")]
    ZeroWindow,
}

/// Training-window policy.
///
/// Serialized as `"expanding"` or as the integer window size in months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSpec {
    Rolling(u32),
    Expanding,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WindowRepr {
    Size(u32),
    Name(String),
}

impl Serialize for WindowSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            WindowSpec::Rolling(w) => WindowRepr::Size(*w),
            WindowSpec::Expanding => WindowRepr::Name("expanding".into()),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WindowSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WindowRepr::deserialize(deserializer)? {
            WindowRepr::Size(w) => Ok(WindowSpec::Rolling(w)),
            WindowRepr::Name(name) if name == "expanding" => Ok(WindowSpec::Expanding),
            WindowRepr::Name(name) => Err(de::Error::custom(format!(
                "expected \"expanding\" or a window size, got \"{name}\""
            ))),
        }
    }
}

impl WindowSpec {
    pub fn validate(&self) -> Result<(), WindowError> {
        match self {
            WindowSpec::Rolling(0) => Err(WindowError::ZeroWindow),
            _ => Ok(()),
        }
    }

    /// Number of leading unique months that can never be a test month.
    pub fn skip(&self) -> usize {
        match self {
            WindowSpec::Rolling(w) => *w as usize,
            WindowSpec::Expanding => 1,
        }
    }

    /// Window size in months, `None` for expanding.
    pub fn size(&self) -> Option<u32> {
        match self {
            WindowSpec::Rolling(w) => Some(*w),
            WindowSpec::Expanding => None,
        }
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::Rolling(w) => write!(f, "{w}"),
            WindowSpec::Expanding => f.write_str("expanding"),
        }
    }
}

/// One backtest iteration: train on `[train_start, train_end)`, test on `test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSplit {
    pub train_start: Month,
    pub train_end: Month,
    pub test: Month,
    /// Position of `test` within the unique-month list.
    pub test_index: usize,
}

/// Produce the ordered train/test splits for a run.
///
/// `ending_offset` is exclusive and slice-style: `None` runs to the last month,
/// and an offset past the end is clamped. Too little history yields an empty
/// list, never an error.
pub fn slice_windows(
    unique_months: &[Month],
    starting_offset: usize,
    ending_offset: Option<usize>,
    spec: WindowSpec,
) -> Vec<WindowSplit> {
    let first = starting_offset.max(spec.skip());
    let end = ending_offset
        .unwrap_or(unique_months.len())
        .min(unique_months.len());
    if first >= end {
        return Vec::new();
    }

    unique_months[first..end]
        .iter()
        .enumerate()
        .map(|(i, &test)| {
            let train_start = match spec {
                WindowSpec::Rolling(w) => test.minus_months(w as i64),
                WindowSpec::Expanding => unique_months[0],
            };
            WindowSplit {
                train_start,
                train_end: test,
                test,
                test_index: first + i,
            }
        })
        .collect()
}
