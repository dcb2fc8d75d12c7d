//! Error handling for trip pivot operations.
//!
//! File-scoped failures are carried as [`FileFailure`] records so a bad input
//! file never aborts a run; run-scoped failures surface as [`PivotError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PivotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No timestamp or location column in file: {file} - {reason}")]
    Schema { file: String, reason: String },

    #[error("Processing failed for file: {path} - {reason}")]
    ProcessingFailed { path: PathBuf, reason: String },

    #[error("Intermediate artifact unusable: {path} - {reason}")]
    Intermediate { path: PathBuf, reason: String },

    #[error("Remote storage error for {uri}: {reason}")]
    Remote { uri: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No input files found under {input}")]
    NoInputFiles { input: String },

    #[error("None of the {files_total} input files could be processed")]
    NoFilesProcessed { files_total: usize },

    #[error("Processing interrupted: {reason}")]
    Interrupted { reason: String },
}

impl PivotError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn remote(uri: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Remote {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn intermediate(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Intermediate {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PivotError>;

/// Lifecycle stage of a single file inside the aggregation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Discovered,
    SchemaChecked,
    Streaming,
    Aggregated,
    Filtered,
    Written,
    Done,
}

impl fmt::Display for FileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileStage::Discovered => "discovered",
            FileStage::SchemaChecked => "schema_checked",
            FileStage::Streaming => "streaming",
            FileStage::Aggregated => "aggregated",
            FileStage::Filtered => "filtered",
            FileStage::Written => "written",
            FileStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A file that reached the `Failed` state, with the stage it failed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub stage: FileStage,
    pub cause: String,
}

impl FileFailure {
    pub fn new(file: impl Into<String>, stage: FileStage, cause: impl fmt::Display) -> Self {
        Self {
            file: file.into(),
            stage,
            cause: cause.to_string(),
        }
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed at {}: {}", self.file, self.stage, self.cause)
    }
}
