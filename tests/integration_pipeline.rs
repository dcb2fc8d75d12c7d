//! End-to-end tests through the public library and CLI entry points
//!
//! These build small yellow and green trip files in a temporary directory,
//! run the whole pipeline and check the final wide table, the metrics and
//! the written report.

use chrono::NaiveDate;
use clap::Parser;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use trip_pivot::cli::args::Args;
use trip_pivot::cli::commands;
use trip_pivot::constants::{DEFAULT_REPORT_NAME, FINAL_TABLE_NAME, HOUR_COLUMNS};
use trip_pivot::storage::write_wide_table;
use trip_pivot::{Pipeline, PipelineConfig, PivotError};

/// Write a trip file with the given timestamp and zone columns
fn write_trip_file(
    dir: &Path,
    name: &str,
    timestamp_column: &str,
    trips: &[(String, i64)],
) -> PathBuf {
    let path = dir.join(name);
    let times: Vec<&str> = trips.iter().map(|(t, _)| t.as_str()).collect();
    let zones: Vec<i64> = trips.iter().map(|(_, z)| *z).collect();
    let mut df = DataFrame::new(vec![
        Series::new(timestamp_column.into(), times).into_column(),
        Series::new("PULocationID".into(), zones).into_column(),
        Series::new("trip_distance".into(), vec![1.7f64; trips.len()]).into_column(),
    ])
    .unwrap();
    write_wide_table(&mut df, &path).unwrap();
    path
}

/// `count` pickups in one zone at one hour of one day
fn pickups(day: &str, hour: u32, zone: i64, count: usize) -> Vec<(String, i64)> {
    (0..count)
        .map(|i| (format!("{} {:02}:{:02}:00", day, hour, i % 60), zone))
        .collect()
}

/// A small fleet: two yellow months, one green month
fn build_fleet(dir: &Path) {
    let mut january = pickups("2023-01-10", 8, 161, 40);
    january.extend(pickups("2023-01-10", 17, 161, 35));
    january.extend(pickups("2023-01-10", 9, 4, 12));
    write_trip_file(dir, "yellow_tripdata_2023-01.parquet", "tpep_pickup_datetime", &january);

    let february = pickups("2023-02-14", 20, 230, 90);
    write_trip_file(dir, "yellow_tripdata_2023-02.parquet", "tpep_pickup_datetime", &february);

    let green = pickups("2023-01-10", 8, 74, 64);
    write_trip_file(dir, "green_tripdata_2023-01.parquet", "lpep_pickup_datetime", &green);

    // not trip data, must be ignored by discovery
    fs::write(dir.join("taxi_zone_lookup.csv"), "LocationID,Borough\n1,EWR\n").unwrap();
}

/// Collect off the tokio thread; polars blocks on its own runtime
fn read_final(path: &Path) -> DataFrame {
    let path = path.to_path_buf();
    std::thread::spawn(move || {
        LazyFrame::scan_parquet(&path, Default::default())
            .unwrap()
            .collect()
            .unwrap()
    })
    .join()
    .unwrap()
}

fn hour_value(df: &DataFrame, row: usize, hour: usize) -> u64 {
    df.column(HOUR_COLUMNS[hour])
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::UInt64)
        .unwrap()
        .u64()
        .unwrap()
        .get(row)
        .unwrap()
}

#[tokio::test]
async fn test_fleet_end_to_end() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    build_fleet(input.path());

    let config = PipelineConfig::new(input.path().display().to_string(), output.path())
        .with_skip_batch_optimization(true)
        .with_default_batch_size(25);
    let summary = Pipeline::new(config)
        .run()
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let final_path = summary.final_table.clone().unwrap();
    assert_eq!(final_path, output.path().join(FINAL_TABLE_NAME));

    let df = read_final(&final_path);
    assert_eq!(df.width(), 3 + HOUR_COLUMNS.len());
    assert_eq!(df.height(), 3);

    // sorted by category, then date, then location
    let categories: Vec<&str> = df
        .column("category")
        .unwrap()
        .as_materialized_series()
        .str()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(categories, vec!["green", "yellow", "yellow"]);
    let locations: Vec<&str> = df
        .column("location")
        .unwrap()
        .as_materialized_series()
        .str()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(locations, vec!["74", "161", "230"]);
    let dates: Vec<NaiveDate> = df
        .column("date")
        .unwrap()
        .as_materialized_series()
        .date()
        .unwrap()
        .as_date_iter()
        .map(|d| d.unwrap())
        .collect();
    assert_eq!(dates[1], NaiveDate::from_ymd_opt(2023, 1, 10).unwrap());

    assert_eq!(hour_value(&df, 0, 8), 64);
    assert_eq!(hour_value(&df, 1, 8), 40);
    assert_eq!(hour_value(&df, 1, 17), 35);
    assert_eq!(hour_value(&df, 2, 20), 90);

    let m = &summary.metrics;
    assert_eq!(m.files_total, 3);
    assert_eq!(m.files_succeeded, 3);
    assert_eq!(m.input_row_count, 241);
    assert_eq!(m.output_row_count, 3);
    assert_eq!(m.output_trip_count, 229);
    assert_eq!(m.discards.low_count, 12);
    assert_eq!(m.batch_size, 25);
    assert!(m.is_conserved());
}

#[tokio::test]
async fn test_cli_process_with_config_file_and_report() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    build_fleet(input.path());

    let config_path = input.path().join("pivot.json");
    fs::write(
        &config_path,
        r#"{ "min_rides": 70, "workers": 2, "skip_batch_optimization": true }"#,
    )
    .unwrap();
    let report_path = output.path().join("reports").join("run.json");

    let args = Args::try_parse_from([
        "trip-pivot".to_string(),
        "process".to_string(),
        "--quiet".to_string(),
        "--input-dir".to_string(),
        input.path().display().to_string(),
        "--output-dir".to_string(),
        output.path().display().to_string(),
        "--config".to_string(),
        config_path.display().to_string(),
        "--report".to_string(),
        report_path.display().to_string(),
        "--partition-size".to_string(),
        "10".to_string(),
    ])
    .unwrap();

    let summary = commands::run(args).await.unwrap();

    // flags override the file; the file overrides the defaults
    let m = &summary.metrics;
    assert_eq!(m.batch_size, 10);
    assert_eq!(m.output_row_count, 2);
    assert_eq!(m.output_trip_count, 75 + 90);
    assert!(m.is_conserved());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["conserved"], serde_json::Value::Bool(true));
    assert_eq!(report["metrics"]["files_succeeded"], 3);
    assert_eq!(report["metrics"]["input_row_count"], 241);
}

#[tokio::test]
async fn test_cli_writes_latex_report_even_when_every_file_fails() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    fs::write(input.path().join("fhv_tripdata_2020-05.parquet"), b"garbage").unwrap();
    let report_path = output.path().join("run.tex");

    let args = Args::try_parse_from([
        "trip-pivot".to_string(),
        "process".to_string(),
        "-q".to_string(),
        "-i".to_string(),
        input.path().display().to_string(),
        "-o".to_string(),
        output.path().display().to_string(),
        "--skip-partition-optimization".to_string(),
        "--report".to_string(),
        report_path.display().to_string(),
    ])
    .unwrap();

    let err = commands::run(args).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PivotError>(),
        Some(PivotError::NoFilesProcessed { files_total: 1 })
    ));

    let latex = fs::read_to_string(&report_path).unwrap();
    assert!(latex.contains("\\begin{tabular}"));
    assert!(latex.contains("fhv\\_tripdata\\_2020-05.parquet"));
    assert!(!output.path().join(FINAL_TABLE_NAME).exists());
}

#[tokio::test]
async fn test_quiet_run_without_report_flag_writes_default_report() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    build_fleet(input.path());

    let args = Args::try_parse_from([
        "trip-pivot".to_string(),
        "process".to_string(),
        "--quiet".to_string(),
        "--input-dir".to_string(),
        input.path().display().to_string(),
        "--output-dir".to_string(),
        output.path().display().to_string(),
    ])
    .unwrap();

    let summary = commands::run(args).await.unwrap();
    assert!(summary.metrics.is_conserved());

    let latex = fs::read_to_string(output.path().join(DEFAULT_REPORT_NAME)).unwrap();
    assert!(latex.contains("\\begin{tabular}"));
    assert!(latex.contains("241"));
}
