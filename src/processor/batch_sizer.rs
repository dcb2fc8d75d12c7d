//! Batch size estimation.
//!
//! One sample of the first file gives the in-memory width of a decoded row;
//! the batch size is the memory budget divided by that width. Estimation
//! never fails a run: any problem falls back to the configured default.

use crate::config::{BatchSizeSpec, PipelineConfig};
use crate::constants::BATCH_SIZER_SAMPLE_ROWS;
use crate::storage::TripFileSource;
use polars::prelude::IdxSize;
use std::fmt;
use tracing::{debug, info, warn};

/// How the batch size was arrived at
#[derive(Debug, Clone, PartialEq)]
pub enum EstimateSource {
    /// Sampled decoded rows
    Sampled { bytes_per_row: f64 },
    /// On-disk size over row count, used when sampling fails
    FileSize { bytes_per_row: f64 },
    /// User override
    Override(BatchSizeSpec),
    /// Estimation was switched off
    Skipped,
    /// Estimation failed; the reason is kept for the log
    Fallback(String),
}

impl fmt::Display for EstimateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimateSource::Sampled { bytes_per_row } => {
                write!(f, "sampled, {:.0} bytes/row", bytes_per_row)
            }
            EstimateSource::FileSize { bytes_per_row } => {
                write!(f, "file size, {:.0} bytes/row", bytes_per_row)
            }
            EstimateSource::Override(spec) => write!(f, "override {:?}", spec),
            EstimateSource::Skipped => write!(f, "optimization skipped"),
            EstimateSource::Fallback(reason) => write!(f, "fallback: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEstimate {
    pub batch_size: usize,
    pub source: EstimateSource,
}

#[derive(Debug, Clone)]
pub struct BatchSizer {
    memory_budget_bytes: u64,
    default_batch_size: usize,
    sample_rows: usize,
}

impl BatchSizer {
    pub fn new(memory_budget_bytes: u64, default_batch_size: usize) -> Self {
        Self {
            memory_budget_bytes,
            default_batch_size: default_batch_size.max(1),
            sample_rows: BATCH_SIZER_SAMPLE_ROWS,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.memory_budget_bytes, config.default_batch_size)
    }

    /// Pick the batch size for a run. Overrides win, then the skip flag,
    /// then an estimate from `sample` when one is available.
    pub fn resolve(
        &self,
        config: &PipelineConfig,
        sample: Option<&TripFileSource>,
    ) -> BatchEstimate {
        let estimate = if let Some(spec) = config.batch_size_override {
            BatchEstimate {
                batch_size: clamp_to_index(spec.rows()),
                source: EstimateSource::Override(spec),
            }
        } else if config.skip_batch_optimization {
            self.fallback_with(EstimateSource::Skipped)
        } else {
            match sample {
                Some(source) => self.estimate(source),
                None => self.fallback("no sample file available"),
            }
        };

        info!(
            "Batch size: {} rows ({})",
            estimate.batch_size, estimate.source
        );
        estimate
    }

    /// Estimate from one file; infallible
    pub fn estimate(&self, source: &TripFileSource) -> BatchEstimate {
        let rows = match source.row_count() {
            Ok(0) => return self.fallback("sample file is empty"),
            Ok(rows) => rows,
            Err(e) => return self.fallback(format!("row count unavailable: {}", e)),
        };

        let sample_len = (rows as usize).min(self.sample_rows);
        match source.read_slice(None, 0, sample_len) {
            Ok(df) if df.height() > 0 => {
                let bytes_per_row = df.estimated_size() as f64 / df.height() as f64;
                debug!(
                    "Sampled {} rows of {}: {} bytes",
                    df.height(),
                    source.path().display(),
                    df.estimated_size()
                );
                self.from_bytes_per_row(bytes_per_row, EstimateSource::Sampled { bytes_per_row })
            }
            Ok(_) => self.fallback("sample returned no rows"),
            Err(e) => {
                warn!("Sampling {} failed: {}", source.path().display(), e);
                match source.file_size() {
                    Ok(bytes) => {
                        let bytes_per_row = bytes as f64 / rows as f64;
                        self.from_bytes_per_row(
                            bytes_per_row,
                            EstimateSource::FileSize { bytes_per_row },
                        )
                    }
                    Err(e) => self.fallback(format!("file size unavailable: {}", e)),
                }
            }
        }
    }

    /// `floor(budget / bytes_per_row)`; a zero or non-finite result falls back.
    ///
    /// Estimates larger than the file are kept as is; the cursor stops at the
    /// last row anyway.
    fn from_bytes_per_row(&self, bytes_per_row: f64, source: EstimateSource) -> BatchEstimate {
        if !bytes_per_row.is_finite() || bytes_per_row <= 0.0 {
            return self.fallback(format!("invalid row width {}", bytes_per_row));
        }
        let rows = (self.memory_budget_bytes as f64 / bytes_per_row).floor();
        if rows < 1.0 {
            return self.fallback(format!(
                "budget of {} bytes holds no {:.0}-byte row",
                self.memory_budget_bytes, bytes_per_row
            ));
        }
        BatchEstimate {
            batch_size: clamp_to_index(rows.min(usize::MAX as f64) as usize),
            source,
        }
    }

    fn fallback(&self, reason: impl Into<String>) -> BatchEstimate {
        self.fallback_with(EstimateSource::Fallback(reason.into()))
    }

    fn fallback_with(&self, source: EstimateSource) -> BatchEstimate {
        BatchEstimate {
            batch_size: self.default_batch_size,
            source,
        }
    }
}

/// Polars slices are indexed by `IdxSize`
fn clamp_to_index(rows: usize) -> usize {
    rows.clamp(1, IdxSize::MAX as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::write_wide_table;
    use polars::prelude::*;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir, rows: usize) -> TripFileSource {
        let path = dir.path().join("sample.parquet");
        let ids: Vec<i64> = (0..rows as i64).collect();
        let mut df = df! { "id" => ids.clone(), "other" => ids }.unwrap();
        write_wide_table(&mut df, &path).unwrap();
        TripFileSource::open(path).unwrap()
    }

    #[test]
    fn test_estimate_divides_budget_by_row_width() {
        let dir = TempDir::new().unwrap();
        let source = fixture(&dir, 1_000);
        // two i64 columns: at least 16 bytes per row
        let sizer = BatchSizer::new(1_600, 7);
        let estimate = sizer.estimate(&source);
        assert!((50..=100).contains(&estimate.batch_size), "{:?}", estimate);
        assert!(matches!(estimate.source, EstimateSource::Sampled { .. }));
    }

    #[test]
    fn test_estimate_may_exceed_file() {
        let dir = TempDir::new().unwrap();
        let source = fixture(&dir, 10);
        let estimate = BatchSizer::new(1 << 30, 7).estimate(&source);
        assert!(estimate.batch_size > 10);
    }

    #[test]
    fn test_tiny_budget_falls_back() {
        let dir = TempDir::new().unwrap();
        let source = fixture(&dir, 10);
        let estimate = BatchSizer::new(1, 7).estimate(&source);
        assert_eq!(estimate.batch_size, 7);
        assert!(matches!(estimate.source, EstimateSource::Fallback(_)));
    }

    #[test]
    fn test_empty_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let source = fixture(&dir, 0);
        let estimate = BatchSizer::new(1 << 20, 42).estimate(&source);
        assert_eq!(estimate.batch_size, 42);
    }

    #[test]
    fn test_resolve_precedence() {
        let dir = TempDir::new().unwrap();
        let source = fixture(&dir, 100);
        let sizer = BatchSizer::new(1_600, 7);

        let config = PipelineConfig::default()
            .with_skip_batch_optimization(true)
            .with_batch_size_override(BatchSizeSpec::Rows(123));
        assert_eq!(sizer.resolve(&config, Some(&source)).batch_size, 123);

        let config = PipelineConfig::default().with_skip_batch_optimization(true);
        let estimate = sizer.resolve(&config, Some(&source));
        assert_eq!(estimate.batch_size, 7);
        assert_eq!(estimate.source, EstimateSource::Skipped);

        let estimate = sizer.resolve(&PipelineConfig::default(), None);
        assert_eq!(estimate.batch_size, 7);
    }
}
