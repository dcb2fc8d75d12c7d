//! Trip Pivot Library
//!
//! Turns a collection of trip-record Parquet files (taxi and for-hire
//! vehicle trips, local or on S3) into one wide table of hourly pickup
//! counts per `(category, date, location)`.
//!
//! This library provides tools for:
//! - Detecting the pickup timestamp and location columns across schema variants
//! - Sizing batches from a memory budget and streaming files batch by batch
//! - Aggregating and pivoting each file independently on a bounded worker pool
//! - Merging per-file tables into the final table with row-conservation metrics

pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod schema;
pub mod storage;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
    pub mod report;
}

// Re-export commonly used types
pub use config::{BatchSizeSpec, PipelineConfig};
pub use error::{FileFailure, FileStage, PivotError, Result};
pub use metrics::MetricsSnapshot;
pub use processor::{Pipeline, RunSummary};
pub use schema::{NormalizedSchema, SchemaNormalizer};
