//! Core data structures for trip pivot processing.
//!
//! Defines the file identity handed over by discovery, discard reasons,
//! and the per-file report each worker returns to the metrics collector.

use crate::error::FileFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Calendar month a file is expected to cover, inferred from its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Where an input file lives
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileLocation {
    Local(PathBuf),
    S3 { bucket: String, key: String },
}

impl FileLocation {
    /// Last path segment, used to name intermediate artifacts
    pub fn file_name(&self) -> String {
        match self {
            FileLocation::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            FileLocation::S3 { key, .. } => key.rsplit('/').next().unwrap_or(key).to_string(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, FileLocation::S3 { .. })
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileLocation::Local(path) => write!(f, "{}", path.display()),
            FileLocation::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
        }
    }
}

/// A discovered input file with the facts resolved from its identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub location: FileLocation,
    pub period: Option<Period>,
    pub category: String,
}

/// Unit of work dispatched to the worker pool
#[derive(Debug, Clone)]
pub struct FileTask {
    /// Position in the sorted discovery order, keeps artifact names unique
    pub index: usize,
    pub file: DiscoveredFile,
}

impl FileTask {
    /// Intermediate artifact name for this task
    pub fn artifact_name(&self) -> String {
        let name = self.file.location.file_name();
        let stem = name.strip_suffix(".parquet").unwrap_or(&name);
        format!(
            "{:06}_{}{}",
            self.index,
            stem,
            crate::constants::INTERMEDIATE_SUFFIX
        )
    }
}

/// Why rows were excluded from the final table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// File lacked a usable timestamp or location column
    Schema,
    /// Row timestamp missing or unparsable
    ParseFailure,
    /// Row belonged to a wide row below the minimum trip count
    LowCount,
    /// File failed while reading or writing after its schema was accepted
    Io,
}

/// Per-reason discard counters, in trips (source rows)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardCounts {
    pub schema: u64,
    pub parse_failure: u64,
    pub low_count: u64,
    pub io: u64,
}

impl DiscardCounts {
    pub fn add(&mut self, reason: DiscardReason, rows: u64) {
        match reason {
            DiscardReason::Schema => self.schema += rows,
            DiscardReason::ParseFailure => self.parse_failure += rows,
            DiscardReason::LowCount => self.low_count += rows,
            DiscardReason::Io => self.io += rows,
        }
    }

    pub fn merge(&mut self, other: &DiscardCounts) {
        self.schema += other.schema;
        self.parse_failure += other.parse_failure;
        self.low_count += other.low_count;
        self.io += other.io;
    }

    pub fn total(&self) -> u64 {
        self.schema + self.parse_failure + self.low_count + self.io
    }
}

/// Outcome of one file's aggregation, returned by the worker that owned it
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub file: String,
    pub period: Option<Period>,
    /// Rows read from the source (or known from metadata for failed files)
    pub input_rows: u64,
    /// Trips retained in the intermediate artifact
    pub retained_trips: u64,
    /// Wide rows written to the intermediate artifact
    pub wide_rows: u64,
    pub discards: DiscardCounts,
    /// Rows whose timestamp month differs from the path period (informational)
    pub period_mismatch: u64,
    pub artifact: Option<PathBuf>,
    pub failure: Option<FileFailure>,
}

impl FileReport {
    pub fn new(file: impl Into<String>, period: Option<Period>) -> Self {
        Self {
            file: file.into(),
            period,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.artifact.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name_is_indexed() {
        let task = FileTask {
            index: 7,
            file: DiscoveredFile {
                location: FileLocation::S3 {
                    bucket: "nyc".to_string(),
                    key: "year=2023/month=01/yellow_tripdata_2023-01.parquet".to_string(),
                },
                period: Some(Period::new(2023, 1)),
                category: "yellow".to_string(),
            },
        };
        assert_eq!(
            task.artifact_name(),
            "000007_yellow_tripdata_2023-01_pivoted.parquet"
        );
    }

    #[test]
    fn test_location_display() {
        let remote = FileLocation::S3 {
            bucket: "b".to_string(),
            key: "k/x.parquet".to_string(),
        };
        assert_eq!(remote.to_string(), "s3://b/k/x.parquet");
        assert_eq!(remote.file_name(), "x.parquet");
        assert!(remote.is_remote());
    }

    #[test]
    fn test_discard_totals() {
        let mut counts = DiscardCounts::default();
        counts.add(DiscardReason::LowCount, 49);
        counts.add(DiscardReason::ParseFailure, 1);
        let mut other = DiscardCounts::default();
        other.add(DiscardReason::Schema, 10);
        counts.merge(&other);
        assert_eq!(counts.total(), 60);
        assert_eq!(counts.schema, 10);
    }

    #[test]
    fn test_period_ordering_and_display() {
        assert!(Period::new(2022, 12) < Period::new(2023, 1));
        assert_eq!(Period::new(2023, 3).to_string(), "2023-03");
    }
}
