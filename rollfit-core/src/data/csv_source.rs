//! CSV ingestion.

use std::io::Read;
use std::path::Path;

use crate::domain::{Dataset, Month, Observation};

use super::{parse_numeric, DataColumns, DataError};

/// Load a dataset from a headered CSV file.
pub fn load_csv(path: &Path, columns: &DataColumns) -> Result<Dataset, DataError> {
    let file = std::fs::File::open(path).map_err(|source| DataError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_csv(file, columns)
}

/// Read a dataset from any CSV source (file, in-memory buffer).
pub fn read_csv<R: Read>(reader: R, columns: &DataColumns) -> Result<Dataset, DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::MissingColumn(name.to_string()))
    };

    let month_idx = position(columns.month.as_str())?;
    let target_idx = position(columns.target.as_str())?;
    let feature_idx: Vec<usize> = columns
        .features
        .iter()
        .map(|f| position(f.as_str()))
        .collect::<Result<_, _>>()?;

    let mut rows = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let cell = |idx: usize| record.get(idx).unwrap_or("");

        let month: Month = cell(month_idx)
            .parse()
            .map_err(|source| DataError::BadMonth { row, source })?;
        let target = parse_numeric(cell(target_idx), row, &columns.target)?;
        let features = feature_idx
            .iter()
            .zip(&columns.features)
            .map(|(&idx, name)| parse_numeric(cell(idx), row, name))
            .collect::<Result<Vec<_>, _>>()?;

        rows.push(Observation {
            month,
            target,
            features,
        });
    }

    Ok(Dataset::new(
        columns.target.clone(),
        columns.features.clone(),
        rows,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTINGS: &str = "\
listing_month,price_realpesos,covered_area,pool,city
2020-02-01,200.0,50,False,x
2020-01-01,100.0,40,True,y
2020-01-15,110.0,42,False,z
";

    fn columns() -> DataColumns {
        DataColumns::new(
            "price_realpesos",
            vec!["covered_area".into(), "pool".into()],
        )
    }

    #[test]
    fn reads_and_sorts_rows() {
        let ds = read_csv(LISTINGS.as_bytes(), &columns()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.target(), &[100.0, 110.0, 200.0]);
        assert_eq!(ds.features()[0], vec![40.0, 1.0]);
        assert_eq!(ds.unique_months().len(), 2);
    }

    #[test]
    fn missing_feature_column_is_reported() {
        let mut cols = columns();
        cols.features.push("bedrooms".into());
        let err = read_csv(LISTINGS.as_bytes(), &cols).unwrap_err();
        assert!(matches!(err, DataError::MissingColumn(c) if c == "bedrooms"));
    }

    #[test]
    fn bad_month_is_reported_with_row() {
        let csv = "listing_month,price_realpesos,covered_area,pool\nsoon,1,1,1\n";
        let err = read_csv(csv.as_bytes(), &columns()).unwrap_err();
        assert!(matches!(err, DataError::BadMonth { row: 0, .. }));
    }

    #[test]
    fn load_csv_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listings.csv");
        std::fs::write(&path, LISTINGS).unwrap();
        let ds = load_csv(&path, &columns()).unwrap();
        assert_eq!(ds.len(), 3);
    }
}
