//! Per-file aggregation.
//!
//! A file moves `Discovered -> SchemaChecked -> Streaming -> Aggregated ->
//! Filtered -> Written -> Done`. Any error moves it to `Failed` with the stage
//! it failed from; the report still accounts for every one of its rows.

use crate::constants::{PICKUP_DATETIME, PICKUP_LOCATION, UNKNOWN_LOCATION};
use crate::error::{FileFailure, FileStage, PivotError, Result};
use crate::models::{DiscardReason, FileReport, FileTask, Period};
use crate::processor::pivot::{HourlyCounts, filter_low_counts, wide_rows_to_frame};
use crate::processor::timestamps::decode_timestamps;
use crate::schema::{NormalizedSchema, SchemaNormalizer};
use crate::storage::{TripFileSource, write_wide_table};

use chrono::{Datelike, Timelike};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Aggregates one trip file into an intermediate wide table
#[derive(Debug, Clone)]
pub struct FileAggregator {
    batch_size: usize,
    min_rides: u64,
    intermediate_dir: PathBuf,
}

/// Mutable progress of one file through the state machine
struct FileState {
    report: FileReport,
    stage: FileStage,
    /// Row count from metadata, once known
    known_rows: Option<u64>,
}

impl FileAggregator {
    pub fn new(batch_size: usize, min_rides: u64, intermediate_dir: impl Into<PathBuf>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            min_rides,
            intermediate_dir: intermediate_dir.into(),
        }
    }

    /// Run the state machine for `task`, reading from the local file `path`.
    ///
    /// Never returns an error: failures are recorded on the report.
    pub fn run(&self, task: &FileTask, path: &Path) -> FileReport {
        let mut state = FileState {
            report: FileReport::new(task.file.location.to_string(), task.file.period),
            stage: FileStage::Discovered,
            known_rows: None,
        };

        let result = self.advance(task, path, &mut state);
        finish(state, result)
    }

    fn advance(&self, task: &FileTask, path: &Path, state: &mut FileState) -> Result<()> {
        let file_id = state.report.file.clone();

        // Discovered -> SchemaChecked
        let source = TripFileSource::open(path)?;
        state.known_rows = Some(source.row_count()?);
        let columns = source.column_names()?;
        let schema = SchemaNormalizer::normalize(&columns).map_err(|e| PivotError::Schema {
            file: file_id.clone(),
            reason: e.to_string(),
        })?;
        state.stage = FileStage::SchemaChecked;

        // SchemaChecked -> Streaming -> Aggregated
        state.stage = FileStage::Streaming;
        let counts = self.stream(&source, &schema, task.file.period, state)?;
        state.stage = FileStage::Aggregated;
        debug!(
            "{}: {} trips in {} buckets",
            file_id,
            counts.total(),
            counts.buckets()
        );

        // Aggregated -> Filtered
        let outcome = filter_low_counts(counts.pivot(&task.file.category), self.min_rides);
        state
            .report
            .discards
            .add(DiscardReason::LowCount, outcome.dropped_trips);
        state.stage = FileStage::Filtered;

        // Filtered -> Written
        let mut frame = wide_rows_to_frame(&outcome.kept)?;
        let artifact = self.intermediate_dir.join(task.artifact_name());
        write_wide_table(&mut frame, &artifact)?;
        state.stage = FileStage::Written;

        state.report.wide_rows = outcome.kept.len() as u64;
        state.report.retained_trips = outcome.kept_trips();
        state.report.artifact = Some(artifact);
        state.stage = FileStage::Done;

        if state.report.period_mismatch > 0 {
            if let Some(period) = task.file.period {
                warn!(
                    "{}: {} rows outside expected period {}",
                    file_id, state.report.period_mismatch, period
                );
            }
        }
        info!(
            "{}: {} rows in, {} wide rows ({} trips) kept, {} low-count trips dropped",
            file_id,
            state.report.input_rows,
            state.report.wide_rows,
            state.report.retained_trips,
            outcome.dropped_trips
        );
        Ok(())
    }

    /// Fold every batch of the file into hourly counts
    fn stream(
        &self,
        source: &TripFileSource,
        schema: &NormalizedSchema,
        expected: Option<Period>,
        state: &mut FileState,
    ) -> Result<HourlyCounts> {
        let total_rows = state.known_rows.unwrap_or(0);
        let mut counts = HourlyCounts::new();

        for batch in source.batches(schema.source_columns(), self.batch_size, total_rows) {
            let batch = batch?;
            state.report.input_rows += batch.height() as u64;
            absorb_batch(&batch, schema, expected, &mut counts, &mut state.report)?;
        }

        Ok(counts)
    }
}

/// Add one batch to the running counts. Rows with an undecodable timestamp are
/// counted as parse failures; null locations go to the unknown bucket.
fn absorb_batch(
    batch: &DataFrame,
    schema: &NormalizedSchema,
    expected: Option<Period>,
    counts: &mut HourlyCounts,
    report: &mut FileReport,
) -> Result<()> {
    let canonical = schema.apply(batch)?;
    let timestamps =
        decode_timestamps(canonical.column(PICKUP_DATETIME)?.as_materialized_series())?;
    let locations = canonical.column(PICKUP_LOCATION)?.as_materialized_series().clone();
    let locations = locations.str()?;

    for (timestamp, location) in timestamps.into_iter().zip(locations.into_iter()) {
        let Some(timestamp) = timestamp else {
            report.discards.add(DiscardReason::ParseFailure, 1);
            continue;
        };
        if let Some(period) = expected {
            if timestamp.year() != period.year || timestamp.month() != period.month {
                report.period_mismatch += 1;
            }
        }
        counts.record(
            timestamp.date(),
            location.unwrap_or(UNKNOWN_LOCATION),
            timestamp.hour(),
        );
    }
    Ok(())
}

/// Close out a file: on failure, every row not already counted as a parse
/// failure is discarded under the reason matching the failure.
fn finish(mut state: FileState, result: Result<()>) -> FileReport {
    let Err(cause) = result else {
        return state.report;
    };

    let reason = match cause {
        PivotError::Schema { .. } => DiscardReason::Schema,
        _ => DiscardReason::Io,
    };
    let rows = state
        .known_rows
        .unwrap_or(0)
        .max(state.report.input_rows);
    let parse_failures = state.report.discards.parse_failure;

    let report = &mut state.report;
    report.input_rows = rows;
    report.discards = Default::default();
    report.discards.add(DiscardReason::ParseFailure, parse_failures);
    report.discards.add(reason, rows - parse_failures);
    report.retained_trips = 0;
    report.wide_rows = 0;
    report.artifact = None;

    let failure = FileFailure::new(report.file.clone(), state.stage, &cause);
    error!("{}", failure);
    report.failure = Some(failure);
    state.report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveredFile, FileLocation};
    use crate::processor::pivot::frame_to_wide_rows;
    use tempfile::TempDir;

    fn task(path: &Path, period: Option<Period>) -> FileTask {
        FileTask {
            index: 0,
            file: DiscoveredFile {
                location: FileLocation::Local(path.to_path_buf()),
                period,
                category: "yellow".to_string(),
            },
        }
    }

    fn write_trips(
        dir: &TempDir,
        name: &str,
        times: Vec<Option<&str>>,
        zones: Vec<Option<i64>>,
    ) -> PathBuf {
        let path = dir.path().join(name);
        let mut df = df! {
            "tpep_pickup_datetime" => times,
            "PULocationID" => zones,
        }
        .unwrap();
        write_wide_table(&mut df, &path).unwrap();
        path
    }

    fn read_artifact(report: &FileReport) -> Vec<crate::processor::pivot::WideRow> {
        let path = report.artifact.as_ref().unwrap();
        let df = LazyFrame::scan_parquet(path, Default::default())
            .unwrap()
            .collect()
            .unwrap();
        frame_to_wide_rows(&df).unwrap()
    }

    #[test]
    fn test_counts_and_filters() {
        let dir = TempDir::new().unwrap();
        let mut times = vec![Some("2023-01-15 03:10:00"); 49];
        times.push(Some("2023-01-15 04:59:59"));
        times.extend(vec![Some("2023-01-16 10:00:00"); 3]);
        let mut zones = vec![Some(132i64); 50];
        zones.extend(vec![Some(7i64); 3]);
        let path = write_trips(&dir, "yellow_tripdata_2023-01.parquet", times, zones);

        let aggregator = FileAggregator::new(7, 50, dir.path().join("intermediate"));
        let report = aggregator.run(&task(&path, Some(Period::new(2023, 1))), &path);

        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(report.input_rows, 53);
        assert_eq!(report.retained_trips, 50);
        assert_eq!(report.discards.low_count, 3);
        assert_eq!(report.period_mismatch, 0);
        assert_eq!(report.retained_trips + report.discards.total(), report.input_rows);

        let rows = read_artifact(&report);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location, "132");
        assert_eq!(rows[0].hours[3], 49);
        assert_eq!(rows[0].hours[4], 1);
    }

    #[test]
    fn test_parse_failures_and_unknown_location() {
        let dir = TempDir::new().unwrap();
        let path = write_trips(
            &dir,
            "green_tripdata_2023-02.parquet",
            vec![Some("2023-02-01 08:00:00"), None, Some("bogus"), Some("2023-02-01 08:30:00")],
            vec![None, Some(1), Some(1), None],
        );

        let aggregator = FileAggregator::new(100, 1, dir.path().join("intermediate"));
        let report = aggregator.run(&task(&path, Some(Period::new(2023, 2))), &path);

        assert!(report.succeeded());
        assert_eq!(report.discards.parse_failure, 2);
        assert_eq!(report.retained_trips, 2);
        let rows = read_artifact(&report);
        assert_eq!(rows[0].location, UNKNOWN_LOCATION);
        assert_eq!(rows[0].hours[8], 2);
    }

    #[test]
    fn test_period_mismatch_is_kept() {
        let dir = TempDir::new().unwrap();
        let mut times = vec![Some("2023-03-31 23:00:00"); 60];
        times.push(Some("2023-04-01 00:00:01"));
        let path = write_trips(&dir, "yellow_tripdata_2023-03.parquet", times, vec![Some(5); 61]);

        let aggregator = FileAggregator::new(10, 1, dir.path().join("intermediate"));
        let report = aggregator.run(&task(&path, Some(Period::new(2023, 3))), &path);

        assert_eq!(report.period_mismatch, 1);
        assert_eq!(report.retained_trips, 61);
        let rows = read_artifact(&report);
        assert!(rows.iter().any(|r| r.date.month() == 4 && r.hours[0] == 1));
    }

    #[test]
    fn test_schema_failure_discards_all_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fhv_tripdata_2023-01.parquet");
        let mut df = df! { "fare" => [1.0, 2.0, 3.0] }.unwrap();
        write_wide_table(&mut df, &path).unwrap();

        let aggregator = FileAggregator::new(10, 1, dir.path().join("intermediate"));
        let report = aggregator.run(&task(&path, None), &path);

        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.stage, FileStage::Discovered);
        assert_eq!(report.input_rows, 3);
        assert_eq!(report.discards.schema, 3);
        assert!(report.artifact.is_none());
        assert!(!dir.path().join("intermediate").exists());
    }

    #[test]
    fn test_unreadable_file_is_io_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("yellow_tripdata_2023-01.parquet");
        std::fs::write(&path, b"definitely not parquet").unwrap();

        let aggregator = FileAggregator::new(10, 1, dir.path().join("intermediate"));
        let report = aggregator.run(&task(&path, None), &path);

        assert!(!report.succeeded());
        assert_eq!(report.input_rows, 0);
        assert_eq!(report.discards.total(), 0);
    }
}
