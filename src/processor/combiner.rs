//! Merge per-file artifacts into the final wide table.
//!
//! Rows sharing `(category, date, location)` across artifacts are summed hour
//! by hour. No threshold is applied here: filtering already happened per file.
//! Any unreadable or malformed artifact fails the whole combine.

use crate::constants::{HOUR_COLUMNS, KEY_COLUMNS};
use crate::error::{PivotError, Result};
use crate::processor::pivot::wide_rows_to_frame;
use crate::storage::write_wide_table;

use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Size of the written final table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombineOutcome {
    pub path: PathBuf,
    /// Wide rows
    pub rows: u64,
    /// Sum over every hour cell
    pub trips: u64,
}

#[derive(Debug, Clone)]
pub struct Combiner {
    output_path: PathBuf,
}

impl Combiner {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Open an artifact lazily after checking it exists and has the wide layout
    pub fn open_artifact(path: &Path) -> Result<LazyFrame> {
        if !path.is_file() {
            return Err(PivotError::intermediate(path, "artifact is missing"));
        }
        let mut frame = LazyFrame::scan_parquet(path, ScanArgsParquet::default())
            .map_err(|e| PivotError::intermediate(path, e))?;
        let schema = frame
            .collect_schema()
            .map_err(|e| PivotError::intermediate(path, e))?;

        let missing: Vec<&str> = KEY_COLUMNS
            .iter()
            .chain(HOUR_COLUMNS.iter())
            .copied()
            .filter(|name| schema.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(PivotError::intermediate(
                path,
                format!("missing columns: {}", missing.join(", ")),
            ));
        }

        for name in KEY_COLUMNS.iter().chain(HOUR_COLUMNS.iter()) {
            if let Some(dtype) = schema.get(name) {
                if !has_wide_type(name, dtype) {
                    return Err(PivotError::intermediate(
                        path,
                        format!("column {} has type {}", name, dtype),
                    ));
                }
            }
        }
        Ok(frame)
    }

    /// Sum hour columns per key across frames, sorted by key.
    ///
    /// Pure over its inputs: the result does not depend on frame order.
    pub fn merge(frames: Vec<LazyFrame>) -> Result<LazyFrame> {
        if frames.is_empty() {
            return Ok(wide_rows_to_frame(&[])?.lazy());
        }

        let keys: Vec<Expr> = KEY_COLUMNS.iter().map(|name| col(*name)).collect();
        let sums: Vec<Expr> = HOUR_COLUMNS
            .iter()
            .map(|name| col(*name).cast(DataType::UInt64).sum().alias(*name))
            .collect();
        let layout: Vec<Expr> = KEY_COLUMNS
            .iter()
            .chain(HOUR_COLUMNS.iter())
            .map(|name| col(*name))
            .collect();

        let merged = concat(frames, UnionArgs::default())?
            .group_by(keys.clone())
            .agg(sums)
            .sort_by_exprs(keys, SortMultipleOptions::default())
            .select(layout);
        Ok(merged)
    }

    /// Merge the artifacts and write the final table atomically
    pub fn combine(&self, artifacts: &[PathBuf]) -> Result<CombineOutcome> {
        info!("Combining {} intermediate artifact(s)", artifacts.len());

        let frames = artifacts
            .iter()
            .map(|path| Self::open_artifact(path))
            .collect::<Result<Vec<_>>>()?;

        let mut table = match Self::merge(frames)?.collect() {
            Ok(table) => table,
            Err(e) => return Err(Self::culprit(artifacts).unwrap_or(PivotError::Polars(e))),
        };
        let trips = total_trips(&table)?;
        write_wide_table(&mut table, &self.output_path)?;

        debug!(
            "Final table: {} rows, {} trips",
            table.height(),
            trips
        );
        Ok(CombineOutcome {
            path: self.output_path.clone(),
            rows: table.height() as u64,
            trips,
        })
    }

    /// The first artifact whose body fails to read on its own
    fn culprit(artifacts: &[PathBuf]) -> Option<PivotError> {
        artifacts.iter().find_map(|path| {
            let read = Self::open_artifact(path).and_then(|frame| Ok(frame.collect()?));
            read.err().map(|e| match e {
                PivotError::Intermediate { .. } => e,
                other => PivotError::intermediate(path, other),
            })
        })
    }
}

/// Key columns are strings except `date`; hour columns are any integer type
fn has_wide_type(name: &str, dtype: &DataType) -> bool {
    match name {
        "date" => matches!(dtype, DataType::Date),
        "category" | "location" => matches!(dtype, DataType::String),
        _ => dtype.is_integer(),
    }
}

/// Sum of all hour cells
pub fn total_trips(table: &DataFrame) -> Result<u64> {
    let mut trips = 0u64;
    for name in HOUR_COLUMNS {
        let column = table
            .column(name)?
            .as_materialized_series()
            .cast(&DataType::UInt64)?;
        trips += column.u64()?.sum().unwrap_or(0);
    }
    Ok(trips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HOURS_PER_DAY;
    use crate::processor::pivot::{WideRow, frame_to_wide_rows};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn row(location: &str, hour: usize, trips: u64) -> WideRow {
        let mut hours = [0; HOURS_PER_DAY];
        hours[hour] = trips;
        WideRow {
            category: "yellow".to_string(),
            date: NaiveDate::from_ymd_opt(2023, 1, 15).unwrap(),
            location: location.to_string(),
            hours,
        }
    }

    fn artifact(dir: &TempDir, name: &str, rows: &[WideRow]) -> PathBuf {
        let path = dir.path().join(name);
        let mut df = wide_rows_to_frame(rows).unwrap();
        write_wide_table(&mut df, &path).unwrap();
        path
    }

    #[test]
    fn test_shared_keys_are_summed() {
        let dir = TempDir::new().unwrap();
        let a = artifact(&dir, "a_pivoted.parquet", &[row("1", 8, 60), row("2", 9, 70)]);
        let b = artifact(&dir, "b_pivoted.parquet", &[row("1", 8, 5), row("1", 9, 55)]);

        let combiner = Combiner::new(dir.path().join("wide_table.parquet"));
        let outcome = combiner.combine(&[a, b]).unwrap();
        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.trips, 190);

        let df = LazyFrame::scan_parquet(&outcome.path, Default::default())
            .unwrap()
            .collect()
            .unwrap();
        let rows = frame_to_wide_rows(&df).unwrap();
        assert_eq!(rows[0].location, "1");
        assert_eq!(rows[0].hours[8], 65);
        assert_eq!(rows[0].hours[9], 55);
        assert_eq!(rows[1].hours[9], 70);
    }

    #[test]
    fn test_no_threshold_at_combine_time() {
        let dir = TempDir::new().unwrap();
        // both rows already passed their own file's filter at a lower threshold
        let a = artifact(&dir, "a_pivoted.parquet", &[row("9", 0, 3)]);
        let combiner = Combiner::new(dir.path().join("wide_table.parquet"));
        let outcome = combiner.combine(&[a]).unwrap();
        assert_eq!(outcome.rows, 1);
        assert_eq!(outcome.trips, 3);
    }

    #[test]
    fn test_missing_artifact_names_path() {
        let dir = TempDir::new().unwrap();
        let good = artifact(&dir, "a_pivoted.parquet", &[row("1", 0, 60)]);
        let missing = dir.path().join("gone_pivoted.parquet");

        let combiner = Combiner::new(dir.path().join("wide_table.parquet"));
        let err = combiner.combine(&[good, missing.clone()]).unwrap_err();
        assert!(matches!(err, PivotError::Intermediate { ref path, .. } if path == &missing));
        assert!(!combiner.output_path().exists());
    }

    #[test]
    fn test_malformed_artifact_is_fatal() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad_pivoted.parquet");
        let mut df = df! { "category" => ["yellow"] }.unwrap();
        write_wide_table(&mut df, &bad).unwrap();

        let err = Combiner::new(dir.path().join("out.parquet"))
            .combine(&[bad])
            .unwrap_err();
        assert!(err.to_string().contains("missing columns"));
    }

    #[test]
    fn test_mistyped_artifact_names_path() {
        let dir = TempDir::new().unwrap();
        let good = artifact(&dir, "a_pivoted.parquet", &[row("1", 0, 60)]);

        let bad = dir.path().join("bad_pivoted.parquet");
        let mut df = wide_rows_to_frame(&[row("2", 0, 60)]).unwrap();
        df.with_column(Series::new("location".into(), [2i64])).unwrap();
        write_wide_table(&mut df, &bad).unwrap();

        let combiner = Combiner::new(dir.path().join("wide_table.parquet"));
        let err = combiner.combine(&[good, bad.clone()]).unwrap_err();
        assert!(matches!(err, PivotError::Intermediate { ref path, .. } if path == &bad));
        assert!(err.to_string().contains("location"));
        assert!(!combiner.output_path().exists());
    }

    #[test]
    fn test_empty_input_writes_empty_table() {
        let dir = TempDir::new().unwrap();
        let outcome = Combiner::new(dir.path().join("wide_table.parquet"))
            .combine(&[])
            .unwrap();
        assert_eq!(outcome.rows, 0);
        assert_eq!(outcome.trips, 0);
        assert!(outcome.path.exists());
    }
}
