//! Command-line argument definitions for the trip pivot tool
//!
//! Defines the CLI surface with the clap derive API. Flags override values
//! from the config file and environment.

use crate::config::{BatchSizeSpec, PipelineConfig, parse_size};
use crate::error::{PivotError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the trip pivot tool
///
/// Aggregates trip-record Parquet files into one wide table of hourly pickup
/// counts per (category, date, location).
#[derive(Debug, Clone, Parser)]
#[command(
    name = "trip-pivot",
    version,
    about = "Aggregate trip-record Parquet files into an hourly wide table",
    long_about = "Streams heterogeneous trip-record Parquet files (local or S3) in memory-bounded \
                  batches, counts pickups per date, location and hour, drops sparse rows, and \
                  merges everything into one wide Parquet table with a conservation report."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Aggregate trip files into the wide table
    Process(ProcessArgs),
}

/// Arguments for the process command
#[derive(Debug, Clone, Parser)]
pub struct ProcessArgs {
    /// Directory, single file, or s3://bucket/prefix holding the trip files
    #[arg(
        short = 'i',
        long = "input-dir",
        value_name = "PATH|S3_URI",
        help = "Input directory, file, or s3://bucket/prefix"
    )]
    pub input: Option<String>,

    /// Output directory for intermediates and wide_table.parquet
    #[arg(
        short = 'o',
        long = "output-dir",
        value_name = "DIR",
        help = "Output directory for the wide table"
    )]
    pub output_dir: Option<PathBuf>,

    /// Minimum trips a (date, location) row needs in its own file
    #[arg(long = "min-rides", value_name = "N", help = "Minimum trips per wide row")]
    pub min_rides: Option<u64>,

    /// Number of files processed concurrently
    #[arg(short = 'j', long = "workers", value_name = "N", help = "Concurrent file workers")]
    pub workers: Option<usize>,

    /// Batch size as a row count ("250000") or a byte size ("200MB")
    ///
    /// Byte sizes are converted at about 500 bytes per row with a floor of
    /// 10 000 rows. Skips sampling.
    #[arg(
        long = "partition-size",
        value_name = "ROWS|SIZE",
        help = "Rows per batch, or a size such as 200MB"
    )]
    pub partition_size: Option<String>,

    /// Use the default batch size instead of sampling the first file
    #[arg(
        long = "skip-partition-optimization",
        help = "Skip batch size estimation"
    )]
    pub skip_partition_optimization: bool,

    /// Memory budget for one batch, e.g. "1.5GB"
    #[arg(
        short = 'm',
        long = "memory-budget",
        value_name = "SIZE",
        help = "Memory budget for one batch"
    )]
    pub memory_budget: Option<String>,

    /// Keep per-file intermediate tables after combining
    #[arg(long = "keep-intermediate", help = "Keep intermediate tables")]
    pub keep_intermediate: bool,

    /// Upload the final table to s3://bucket/key
    #[arg(long = "s3-output", value_name = "S3_URI", help = "Upload the final table to S3")]
    pub s3_output: Option<String>,

    /// Write the run report here (.json, or .tex for a LaTeX summary);
    /// defaults to `report.tex` in the output directory
    #[arg(
        long = "report",
        value_name = "PATH",
        help = "Run report path (.json or .tex) [default: <output-dir>/report.tex]"
    )]
    pub report: Option<PathBuf>,

    /// Only process the first N discovered files
    #[arg(long = "max-files", value_name = "N", help = "Process at most N files")]
    pub max_files: Option<usize>,

    /// JSON configuration file
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        help = "Configuration file (JSON)"
    )]
    pub config_file: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)"
    )]
    pub verbose: u8,

    /// Only show errors; no progress bar
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Suppress output except errors",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,
}

impl ProcessArgs {
    /// Check flags that clap cannot check on its own
    pub fn validate(&self) -> Result<()> {
        if let Some(config_file) = &self.config_file {
            if !config_file.exists() {
                return Err(PivotError::configuration(format!(
                    "Config file does not exist: {}",
                    config_file.display()
                )));
            }
        }
        if self.workers == Some(0) {
            return Err(PivotError::configuration(
                "Number of workers must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Overlay the flags that were given onto `config`
    pub fn apply_to(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(min_rides) = self.min_rides {
            config.min_rides = min_rides;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(size) = &self.partition_size {
            config.batch_size_override = Some(size.parse::<BatchSizeSpec>()?);
        }
        if self.skip_partition_optimization {
            config.skip_batch_optimization = true;
        }
        if let Some(budget) = &self.memory_budget {
            config.memory_budget_bytes = parse_size(budget)?;
        }
        if self.keep_intermediate {
            config.keep_intermediate = true;
        }
        if let Some(uri) = &self.s3_output {
            config.s3_output = Some(uri.clone());
        }
        if let Some(max_files) = self.max_files {
            config.max_files = Some(max_files);
        }
        Ok(())
    }

    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        }
    }

    /// Check if we should show progress bars (not in quiet mode)
    pub fn show_progress(&self) -> bool {
        !self.quiet
    }
}
