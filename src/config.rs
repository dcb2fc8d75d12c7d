//! Configuration management and validation.
//!
//! `PipelineConfig` carries every tunable of a run. Values are layered: a
//! JSON config file, then `TRIP_PIVOT_*` environment variables, then CLI
//! flags, with `validate()` applied last.

use crate::constants::{
    ASSUMED_BYTES_PER_ROW, DEFAULT_BATCH_SIZE, DEFAULT_MEMORY_BUDGET_BYTES, DEFAULT_MIN_RIDES,
    DEFAULT_WORKERS, ENV_PREFIX, FINAL_TABLE_NAME, INTERMEDIATE_DIR_NAME, MIN_DERIVED_BATCH_SIZE,
    TRIP_FILE_MARKER,
};
use crate::error::{PivotError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, warn};

static SIZE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*([KMGTP]?)(I?B)?$").ok());

/// Parse a human size string ("200MB", "1.5GB", "512k", "1024") into bytes.
///
/// Multipliers are binary (1 KB = 1024 bytes). A bare number is bytes.
pub fn parse_size(input: &str) -> Result<u64> {
    let normalized = input.trim().to_uppercase();
    let pattern = SIZE_PATTERN
        .as_ref()
        .ok_or_else(|| PivotError::configuration("size pattern failed to compile"))?;
    let captures = pattern
        .captures(&normalized)
        .ok_or_else(|| PivotError::configuration(format!("invalid size: '{}'", input)))?;

    let number: f64 = captures[1]
        .parse()
        .map_err(|_| PivotError::configuration(format!("invalid size: '{}'", input)))?;
    let multiplier: u64 = match captures.get(2).map(|m| m.as_str()).unwrap_or("") {
        "" => 1,
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        "T" => 1024u64.pow(4),
        "P" => 1024u64.pow(5),
        other => {
            return Err(PivotError::configuration(format!(
                "unknown size unit '{}' in '{}'",
                other, input
            )));
        }
    };

    Ok((number * multiplier as f64) as u64)
}

/// Explicit batch size from the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSizeSpec {
    /// Exact number of rows per batch
    Rows(usize),
    /// A byte budget, converted to rows at an assumed row width
    Bytes(u64),
}

impl BatchSizeSpec {
    /// Rows per batch this override stands for
    pub fn rows(&self) -> usize {
        match self {
            BatchSizeSpec::Rows(rows) => (*rows).max(1),
            BatchSizeSpec::Bytes(bytes) => {
                ((bytes / ASSUMED_BYTES_PER_ROW) as usize).max(MIN_DERIVED_BATCH_SIZE)
            }
        }
    }
}

impl FromStr for BatchSizeSpec {
    type Err = PivotError;

    /// A plain integer is a row count; anything with a unit is a byte size
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().replace('_', "");
        if let Ok(rows) = trimmed.parse::<usize>() {
            return Ok(BatchSizeSpec::Rows(rows));
        }
        parse_size(&trimmed).map(BatchSizeSpec::Bytes)
    }
}

/// Settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Local directory, single file, or `s3://bucket/prefix`
    pub input: String,

    /// Directory receiving intermediates and the final table
    pub output_dir: PathBuf,

    /// Memory budget for one in-memory batch, in bytes
    pub memory_budget_bytes: u64,

    /// Batch size used when estimation is skipped or fails
    pub default_batch_size: usize,

    /// User-provided batch size, bypasses estimation
    pub batch_size_override: Option<BatchSizeSpec>,

    /// Wide rows with fewer trips than this are dropped per file
    pub min_rides: u64,

    /// Files processed concurrently
    pub workers: usize,

    /// Use `default_batch_size` instead of sampling the first file
    pub skip_batch_optimization: bool,

    /// Keep per-file artifacts after combining
    pub keep_intermediate: bool,

    /// Optional `s3://bucket/key` to upload the final table to
    pub s3_output: Option<String>,

    /// Only process the first N discovered files
    pub max_files: Option<usize>,

    /// Substring a file identifier must contain to count as trip data
    pub trip_file_marker: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: String::from("."),
            output_dir: PathBuf::from("output"),
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            default_batch_size: DEFAULT_BATCH_SIZE,
            batch_size_override: None,
            min_rides: DEFAULT_MIN_RIDES,
            workers: DEFAULT_WORKERS,
            skip_batch_optimization: false,
            keep_intermediate: false,
            s3_output: None,
            max_files: None,
            trip_file_marker: TRIP_FILE_MARKER.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn new(input: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_min_rides(mut self, min_rides: u64) -> Self {
        self.min_rides = min_rides;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    pub fn with_default_batch_size(mut self, rows: usize) -> Self {
        self.default_batch_size = rows;
        self
    }

    pub fn with_batch_size_override(mut self, spec: BatchSizeSpec) -> Self {
        self.batch_size_override = Some(spec);
        self
    }

    pub fn with_skip_batch_optimization(mut self, skip: bool) -> Self {
        self.skip_batch_optimization = skip;
        self
    }

    pub fn with_keep_intermediate(mut self, keep: bool) -> Self {
        self.keep_intermediate = keep;
        self
    }

    pub fn with_s3_output(mut self, uri: impl Into<String>) -> Self {
        self.s3_output = Some(uri.into());
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = Some(max_files);
        self
    }

    pub fn with_trip_file_marker(mut self, marker: impl Into<String>) -> Self {
        self.trip_file_marker = marker.into();
        self
    }

    /// Directory holding per-file artifacts
    pub fn intermediate_dir(&self) -> PathBuf {
        self.output_dir.join(INTERMEDIATE_DIR_NAME)
    }

    /// Location of the combined wide table
    pub fn final_table_path(&self) -> PathBuf {
        self.output_dir.join(FINAL_TABLE_NAME)
    }

    /// Default config file location (`<config dir>/trip-pivot/config.json`)
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("trip-pivot").join("config.json"))
    }

    /// Read a JSON config file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Start from an explicit config file, else the default location if it
    /// exists, else built-in defaults; then apply environment overrides.
    pub fn load_layered(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_json_file(path)?,
            None => match Self::default_config_path() {
                Some(path) if path.is_file() => Self::from_json_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `TRIP_PIVOT_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(value) = var("MIN_RIDES") {
            self.min_rides = value.trim().parse().map_err(|_| {
                PivotError::configuration(format!("{}MIN_RIDES must be an integer", ENV_PREFIX))
            })?;
        }
        if let Some(value) = var("WORKERS") {
            self.workers = value.trim().parse().map_err(|_| {
                PivotError::configuration(format!("{}WORKERS must be an integer", ENV_PREFIX))
            })?;
        }
        if let Some(value) = var("MEMORY_BUDGET") {
            self.memory_budget_bytes = parse_size(&value)?;
        }
        if let Some(value) = var("BATCH_SIZE") {
            self.batch_size_override = Some(value.parse()?);
        }
        Ok(())
    }

    /// Check invariants; warns when more workers than cores are requested
    pub fn validate(&self) -> Result<()> {
        if self.input.trim().is_empty() {
            return Err(PivotError::configuration("input must not be empty"));
        }
        if self.min_rides == 0 {
            return Err(PivotError::configuration("min_rides must be at least 1"));
        }
        if self.workers == 0 {
            return Err(PivotError::configuration("workers must be at least 1"));
        }
        if self.default_batch_size == 0 {
            return Err(PivotError::configuration(
                "default_batch_size must be at least 1",
            ));
        }
        if self.memory_budget_bytes == 0 {
            return Err(PivotError::configuration("memory budget must be non-zero"));
        }
        if let Some(BatchSizeSpec::Rows(0)) = self.batch_size_override {
            return Err(PivotError::configuration("batch size must be at least 1"));
        }
        if let Some(uri) = &self.s3_output {
            if crate::storage::parse_s3_uri(uri).is_none_or(|(_, key)| key.is_empty()) {
                return Err(PivotError::configuration(format!(
                    "s3 output must look like s3://bucket/key, got '{}'",
                    uri
                )));
            }
        }

        let cores = num_cpus::get();
        if self.workers > cores {
            warn!(
                "{} workers requested but only {} CPU cores available",
                self.workers, cores
            );
        }
        Ok(())
    }
}
