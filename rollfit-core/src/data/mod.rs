//! Dataset ingestion from CSV and Parquet files.
//!
//! Both loaders read the same [`DataColumns`] description: one month column,
//! one numeric target and an ordered list of numeric feature columns. The
//! input is expected to be cleaned already; a missing or non-numeric cell is
//! an error, not something to impute.

pub mod csv_source;
pub mod parquet_source;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Dataset, DatasetError, MonthError};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("row {row}, column '{column}': {reason}")]
    BadValue {
        row: usize,
        column: String,
        reason: String,
    },

    #[error("row {row}: {source}")]
    BadMonth {
        row: usize,
        #[source]
        source: MonthError,
    },

    #[error("unsupported file type '{0}' (expected .csv or .parquet)")]
    UnsupportedFormat(String),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

/// Which columns of the input table make up the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataColumns {
    /// Month column (date, datetime or `YYYY-MM` string).
    #[serde(default = "default_month_column")]
    pub month: String,
    /// Dependent variable.
    pub target: String,
    /// Independent variables, in model input order.
    pub features: Vec<String>,
}

fn default_month_column() -> String {
    "listing_month".to_string()
}

impl DataColumns {
    pub fn new(target: impl Into<String>, features: Vec<String>) -> Self {
        Self {
            month: default_month_column(),
            target: target.into(),
            features,
        }
    }
}

/// Load a dataset, picking the reader from the file extension.
pub fn load_dataset(path: &Path, columns: &DataColumns) -> Result<Dataset, DataError> {
    let dataset = match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => csv_source::load_csv(path, columns)?,
        Some("parquet") => parquet_source::load_parquet(path, columns)?,
        other => {
            return Err(DataError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            ))
        }
    };
    debug!(
        path = %path.display(),
        rows = dataset.len(),
        features = dataset.feature_count(),
        "dataset loaded"
    );
    Ok(dataset)
}

/// Parse a numeric cell. Boolean cells (`True`/`False`) map to 1/0.
pub(crate) fn parse_numeric(raw: &str, row: usize, column: &str) -> Result<f64, DataError> {
    let trimmed = raw.trim();
    match trimmed {
        "True" | "true" => return Ok(1.0),
        "False" | "false" => return Ok(0.0),
        "" => {
            return Err(DataError::BadValue {
                row,
                column: column.to_string(),
                reason: "empty cell".into(),
            })
        }
        _ => {}
    }
    trimmed.parse::<f64>().map_err(|e| DataError::BadValue {
        row,
        column: column.to_string(),
        reason: e.to_string(),
    })
}
