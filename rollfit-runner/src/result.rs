//! Result table: one row per evaluated month.
//!
//! CSV layout is `month, loop_duration_seconds, <metrics...>, <params...>`.
//! An empty cell means the value is missing (a skipped month, or a
//! parameter that was not tuned).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use rollfit_core::domain::{Month, MonthError};
use rollfit_core::metrics::ErrorMetric;
use rollfit_core::model::ParamName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MONTH_COLUMN: &str = "month";
pub const DURATION_COLUMN: &str = "loop_duration_seconds";

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("result table has no 'month' column")]
    MissingMonthColumn,

    #[error("unknown result column '{0}'")]
    UnknownColumn(String),

    #[error("row {row}: {source}")]
    BadMonth {
        row: usize,
        #[source]
        source: MonthError,
    },

    #[error("row {row}, column '{column}': '{value}' is not a number")]
    BadValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("result table is not valid UTF-8")]
    NotUtf8,
}

/// Outcome of one evaluated (or deliberately skipped) month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub month: Month,
    pub duration_secs: Option<f64>,
    pub metrics: BTreeMap<ErrorMetric, f64>,
    /// Winning value of every tuned hyperparameter.
    pub params: BTreeMap<ParamName, f64>,
}

impl ResultRow {
    /// Row with no values, used for months that were skipped.
    pub fn empty(month: Month) -> Self {
        Self {
            month,
            duration_secs: None,
            metrics: BTreeMap::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn metric(&self, metric: ErrorMetric) -> Option<f64> {
        self.metrics.get(&metric).copied()
    }
}

/// Ordered result rows plus the metric and parameter column sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    metrics: Vec<ErrorMetric>,
    params: Vec<ParamName>,
    rows: Vec<ResultRow>,
}

impl ResultTable {
    /// Column sets are sorted and deduplicated.
    pub fn new(
        metrics: impl IntoIterator<Item = ErrorMetric>,
        params: impl IntoIterator<Item = ParamName>,
        rows: Vec<ResultRow>,
    ) -> Self {
        let mut metrics: Vec<_> = metrics.into_iter().collect();
        metrics.sort_unstable();
        metrics.dedup();
        let mut params: Vec<_> = params.into_iter().collect();
        params.sort_unstable();
        params.dedup();
        Self {
            metrics,
            params,
            rows,
        }
    }

    pub fn metrics(&self) -> &[ErrorMetric] {
        &self.metrics
    }

    pub fn params(&self) -> &[ParamName] {
        &self.params
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, month: Month) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.month == month)
    }

    /// Value of `metric` for `month`, `None` if the row or the cell is missing.
    pub fn metric(&self, month: Month, metric: ErrorMetric) -> Option<f64> {
        self.row(month).and_then(|r| r.metric(metric))
    }

    // ─── CSV ────────────────────────────────────────────────────────

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ResultError> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = vec![MONTH_COLUMN.to_string(), DURATION_COLUMN.to_string()];
        header.extend(self.metrics.iter().map(|m| m.as_str().to_string()));
        header.extend(self.params.iter().map(|p| p.as_str().to_string()));
        wtr.write_record(&header)?;

        let cell = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        for row in &self.rows {
            let mut record = vec![row.month.to_string(), cell(row.duration_secs)];
            record.extend(self.metrics.iter().map(|m| cell(row.metric(*m))));
            record.extend(self.params.iter().map(|p| cell(row.params.get(p).copied())));
            wtr.write_record(&record)?;
        }
        wtr.flush().map_err(|source| ResultError::Io {
            path: "<writer>".into(),
            source,
        })?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, ResultError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).map_err(|_| ResultError::NotUtf8)
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self, ResultError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        enum Column {
            Month,
            Duration,
            Metric(ErrorMetric),
            Param(ParamName),
        }

        let columns: Vec<Column> = rdr
            .headers()?
            .iter()
            .map(|name| match name {
                MONTH_COLUMN => Ok(Column::Month),
                DURATION_COLUMN => Ok(Column::Duration),
                other => other
                    .parse::<ErrorMetric>()
                    .map(Column::Metric)
                    .or_else(|_| other.parse::<ParamName>().map(Column::Param))
                    .map_err(|_| ResultError::UnknownColumn(other.to_string())),
            })
            .collect::<Result<_, _>>()?;
        if !columns.iter().any(|c| matches!(c, Column::Month)) {
            return Err(ResultError::MissingMonthColumn);
        }

        let headers = rdr.headers()?.clone();
        let mut rows = Vec::new();
        for (row_idx, record) in rdr.records().enumerate() {
            let record = record?;
            let mut month = None;
            let mut duration_secs = None;
            let mut metrics = BTreeMap::new();
            let mut params = BTreeMap::new();
            for ((column, raw), name) in columns.iter().zip(record.iter()).zip(headers.iter()) {
                if let Column::Month = column {
                    month = Some(raw.parse::<Month>().map_err(|source| {
                        ResultError::BadMonth {
                            row: row_idx,
                            source,
                        }
                    })?);
                    continue;
                }
                if raw.is_empty() {
                    continue;
                }
                let value: f64 = raw.parse().map_err(|_| ResultError::BadValue {
                    row: row_idx,
                    column: name.to_string(),
                    value: raw.to_string(),
                })?;
                match column {
                    Column::Duration => duration_secs = Some(value),
                    Column::Metric(m) => {
                        metrics.insert(*m, value);
                    }
                    Column::Param(p) => {
                        params.insert(*p, value);
                    }
                    Column::Month => {}
                }
            }
            let row = ResultRow {
                month: month.ok_or(ResultError::MissingMonthColumn)?,
                duration_secs,
                metrics,
                params,
            };
            rows.push(row);
        }

        let metrics = columns.iter().filter_map(|c| match c {
            Column::Metric(m) => Some(*m),
            _ => None,
        });
        let params = columns.iter().filter_map(|c| match c {
            Column::Param(p) => Some(*p),
            _ => None,
        });
        Ok(Self::new(metrics.collect::<Vec<_>>(), params.collect::<Vec<_>>(), rows))
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ResultError> {
        let io_err = |source| ResultError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        self.write_csv(file)
    }

    pub fn read_from(path: &Path) -> Result<Self, ResultError> {
        let file = File::open(path).map_err(|source| ResultError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::read_csv(file)
    }
}
