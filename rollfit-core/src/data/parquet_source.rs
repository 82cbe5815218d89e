//! Parquet ingestion via Polars.

use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::Path;

use crate::domain::{Dataset, Month, Observation};

use super::{DataColumns, DataError};

/// Load a dataset from a Parquet file.
///
/// The month column may be a `Date`, a `Datetime` or a string column; every
/// other listed column is cast to `Float64`.
pub fn load_parquet(path: &Path, columns: &DataColumns) -> Result<Dataset, DataError> {
    let file = fs::File::open(path).map_err(|source| DataError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read: {e}")))?;
    dataframe_to_dataset(&df, columns)
}

/// Convert an already-loaded DataFrame.
pub fn dataframe_to_dataset(df: &DataFrame, columns: &DataColumns) -> Result<Dataset, DataError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|_| DataError::MissingColumn(name.to_string()))
    };

    let months = read_months(column(columns.month.as_str())?, &columns.month)?;
    let target = read_f64(column(columns.target.as_str())?, &columns.target)?;
    let features = columns
        .features
        .iter()
        .map(|name| read_f64(column(name.as_str())?, name))
        .collect::<Result<Vec<_>, _>>()?;

    let rows = (0..df.height())
        .map(|i| Observation {
            month: months[i],
            target: target[i],
            features: features.iter().map(|col| col[i]).collect(),
        })
        .collect();

    Ok(Dataset::new(
        columns.target.clone(),
        columns.features.clone(),
        rows,
    )?)
}

fn read_months(col: &Column, name: &str) -> Result<Vec<Month>, DataError> {
    let null_at = |row: usize| DataError::BadValue {
        row,
        column: name.to_string(),
        reason: "null month".into(),
    };

    match col.dtype() {
        DataType::String => {
            let ca = col
                .str()
                .map_err(|e| DataError::Parquet(format!("{name} column type: {e}")))?;
            (0..ca.len())
                .map(|row| {
                    let raw = ca.get(row).ok_or_else(|| null_at(row))?;
                    raw.parse()
                        .map_err(|source| DataError::BadMonth { row, source })
                })
                .collect()
        }
        DataType::Date | DataType::Datetime(_, _) => {
            let as_date = col
                .cast(&DataType::Date)
                .map_err(|e| DataError::Parquet(format!("{name} cast to date: {e}")))?;
            let ca = as_date
                .date()
                .map_err(|e| DataError::Parquet(format!("{name} column type: {e}")))?;
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
                .ok_or_else(|| DataError::Parquet("epoch out of range".into()))?;
            (0..ca.len())
                .map(|row| {
                    let days = ca.get(row).ok_or_else(|| null_at(row))?;
                    Ok(Month::from_date(epoch + chrono::Duration::days(days as i64)))
                })
                .collect()
        }
        other => Err(DataError::BadValue {
            row: 0,
            column: name.to_string(),
            reason: format!("unsupported month dtype {other}"),
        }),
    }
}

fn read_f64(col: &Column, name: &str) -> Result<Vec<f64>, DataError> {
    let cast = col
        .cast(&DataType::Float64)
        .map_err(|e| DataError::Parquet(format!("{name} cast to f64: {e}")))?;
    let ca = cast
        .f64()
        .map_err(|e| DataError::Parquet(format!("{name} column type: {e}")))?;
    (0..ca.len())
        .map(|row| {
            ca.get(row).ok_or_else(|| DataError::BadValue {
                row,
                column: name.to_string(),
                reason: "null value".into(),
            })
        })
        .collect()
}
