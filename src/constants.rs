//! Application constants for the trip pivot pipeline
//!
//! Column aliases used for schema detection, canonical output column names,
//! and default values for the configuration surface.

// =============================================================================
// Canonical Column Names
// =============================================================================

/// Canonical name of the normalized pickup timestamp column
pub const PICKUP_DATETIME: &str = "pickup_datetime";

/// Canonical name of the normalized pickup location column
pub const PICKUP_LOCATION: &str = "pickup_location";

/// Wide table key columns, in output order
pub const CATEGORY_COLUMN: &str = "category";
pub const DATE_COLUMN: &str = "date";
pub const LOCATION_COLUMN: &str = "location";
pub const KEY_COLUMNS: [&str; 3] = [CATEGORY_COLUMN, DATE_COLUMN, LOCATION_COLUMN];

/// Number of hour buckets per wide row
pub const HOURS_PER_DAY: usize = 24;

/// Hour column names `hour_0` .. `hour_23`
pub const HOUR_COLUMNS: [&str; HOURS_PER_DAY] = [
    "hour_0", "hour_1", "hour_2", "hour_3", "hour_4", "hour_5", "hour_6", "hour_7", "hour_8",
    "hour_9", "hour_10", "hour_11", "hour_12", "hour_13", "hour_14", "hour_15", "hour_16",
    "hour_17", "hour_18", "hour_19", "hour_20", "hour_21", "hour_22", "hour_23",
];

/// Location value used for rows whose location cell is null
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Category used when the path does not name a known fleet
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Fleet categories recognised in file paths, checked in order
pub const KNOWN_CATEGORIES: &[&str] = &["yellow", "green", "fhv"];

// =============================================================================
// Schema Detection Aliases
// =============================================================================

/// Exact (case-insensitive) aliases for the pickup timestamp, highest priority first
pub const TIMESTAMP_ALIASES: &[&str] = &[
    "pickup_datetime",
    "tpep_pickup_datetime",
    "lpep_pickup_datetime",
    "trip_pickup_datetime",
    "pickup_datetime_utc",
    "pickup_date",
    "pickup_time",
    "request_datetime",
    "request_date",
];

/// Substring heuristics for the timestamp: (required prefix term, any-of terms)
pub const TIMESTAMP_HEURISTICS: &[(&str, &[&str])] = &[
    ("pickup", &["datetime", "date", "time"]),
    ("request", &["datetime", "date", "time"]),
];

/// Exact (case-insensitive) aliases for the pickup location, highest priority first
pub const LOCATION_ALIASES: &[&str] = &[
    "pickup_location",
    "pulocationid",
    "pu_location_id",
    "pickup_location_id",
    "pickup_locationid",
    "pickup_zone_id",
    "pu_zone",
    "origin_location_id",
    "location_id",
];

/// Substring heuristics for the location
pub const LOCATION_HEURISTICS: &[(&str, &[&str])] = &[
    ("pickup", &["location", "zone"]),
    ("pu_", &["location", "zone"]),
];

/// Coordinate column aliases used when no location id column exists
pub const LATITUDE_ALIASES: &[&str] = &[
    "start_lat",
    "start_latitude",
    "pickup_lat",
    "pickup_latitude",
    "origin_lat",
];
pub const LONGITUDE_ALIASES: &[&str] = &[
    "start_lon",
    "start_longitude",
    "pickup_lon",
    "pickup_longitude",
    "origin_lon",
];

// =============================================================================
// Processing Defaults
// =============================================================================

/// Minimum total trips for a wide row to survive the per-file filter
pub const DEFAULT_MIN_RIDES: u64 = 50;

/// Fallback batch size (rows) when estimation is skipped or fails
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Default memory budget for a single in-memory batch (1.5 GiB)
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 1536 * 1024 * 1024;

/// Default number of concurrent file workers (serial)
pub const DEFAULT_WORKERS: usize = 1;

/// Rows read when sampling a file for its per-row footprint
pub const BATCH_SIZER_SAMPLE_ROWS: usize = 10_000;

/// Bytes-per-row assumed when a size string is given as the batch size
pub const ASSUMED_BYTES_PER_ROW: u64 = 500;

/// Floor applied to batch sizes derived from a size string
pub const MIN_DERIVED_BATCH_SIZE: usize = 10_000;

/// Substring that marks a discovered file as trip data
pub const TRIP_FILE_MARKER: &str = "tripdata";

/// Interval between peak-memory samples
pub const MEMORY_SAMPLE_INTERVAL_MS: u64 = 500;

// =============================================================================
// Output Layout
// =============================================================================

/// Subdirectory of the output dir holding per-file artifacts
pub const INTERMEDIATE_DIR_NAME: &str = "intermediate";

/// Suffix of per-file intermediate artifacts
pub const INTERMEDIATE_SUFFIX: &str = "_pivoted.parquet";

/// File name of the final wide table
pub const FINAL_TABLE_NAME: &str = "wide_table.parquet";

/// Run report written to the output dir when `--report` is not given
pub const DEFAULT_REPORT_NAME: &str = "report.tex";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TRIP_PIVOT_";
