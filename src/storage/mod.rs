//! Columnar storage access for trip files and wide tables.
//!
//! Local Parquet files are read through Polars lazy scans so only the
//! projected columns of one row slice are decoded at a time. Remote objects
//! are staged to local temporary files before reading.

pub mod parquet;
pub mod s3;

pub use self::parquet::{BatchCursor, TripFileSource, write_wide_table};
pub use self::s3::{S3Store, is_s3_uri, parse_s3_uri};
