//! Parquet reading in bounded row slices and atomic wide-table writes.

use crate::error::{PivotError, Result};

use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Read handle over one local Parquet trip file
#[derive(Debug, Clone)]
pub struct TripFileSource {
    path: PathBuf,
}

impl TripFileSource {
    /// Open a local file; fails if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(PivotError::ProcessingFailed {
                path,
                reason: "file does not exist".to_string(),
            });
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scan(&self) -> PolarsResult<LazyFrame> {
        LazyFrame::scan_parquet(&self.path, ScanArgsParquet::default())
    }

    /// Column names from the file footer, no data read
    pub fn column_names(&self) -> Result<Vec<String>> {
        let schema = self.scan()?.collect_schema()?;
        Ok(schema.iter_names().map(|name| name.to_string()).collect())
    }

    /// Total row count from metadata
    pub fn row_count(&self) -> Result<u64> {
        let count_df = self.scan()?.select([len()]).collect()?;
        let rows = count_df
            .column("len")?
            .get(0)?
            .try_extract::<u64>()
            .unwrap_or(0);
        Ok(rows)
    }

    /// On-disk (compressed) size in bytes
    pub fn file_size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Read `len` rows starting at `offset`, projected to `columns` when given
    pub fn read_slice(
        &self,
        columns: Option<&[String]>,
        offset: u64,
        len: usize,
    ) -> Result<DataFrame> {
        let mut frame = self.scan()?;
        if let Some(columns) = columns {
            let projection: Vec<Expr> = columns.iter().map(|c| col(c.as_str())).collect();
            frame = frame.select(projection);
        }
        let len = len.min(IdxSize::MAX as usize) as IdxSize;
        Ok(frame.slice(offset as i64, len).collect()?)
    }

    /// Sequential cursor over the file in `batch_size`-row chunks
    pub fn batches(
        &self,
        columns: Vec<String>,
        batch_size: usize,
        total_rows: u64,
    ) -> BatchCursor<'_> {
        BatchCursor {
            source: self,
            columns,
            batch_size: batch_size.max(1),
            total_rows,
            offset: 0,
        }
    }
}

/// Lazy, finite sequence of row chunks over one file.
///
/// Each call to `next` decodes exactly one slice; nothing is prefetched.
#[derive(Debug)]
pub struct BatchCursor<'a> {
    source: &'a TripFileSource,
    columns: Vec<String>,
    batch_size: usize,
    total_rows: u64,
    offset: u64,
}

impl BatchCursor<'_> {
    /// Start again from the first row
    pub fn rewind(&mut self) {
        self.offset = 0;
    }
}

impl Iterator for BatchCursor<'_> {
    type Item = Result<DataFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.total_rows {
            return None;
        }
        let remaining = (self.total_rows - self.offset) as usize;
        let len = remaining.min(self.batch_size);
        let batch = self.source.read_slice(Some(&self.columns), self.offset, len);
        self.offset += len as u64;
        if let Ok(df) = &batch {
            // a short read means the footer overstated the row count
            if df.height() < len {
                self.offset = self.total_rows;
            }
        } else {
            self.offset = self.total_rows;
        }
        Some(batch)
    }
}

/// Write a wide table atomically: the parquet body goes to a temporary file
/// in the target directory and is renamed into place once complete.
pub fn write_wide_table(df: &mut DataFrame, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    ParquetWriter::new(tmp.as_file_mut())
        .with_compression(ParquetCompression::Snappy)
        .finish(df)
        .map_err(|e| PivotError::ProcessingFailed {
            path: path.to_path_buf(),
            reason: format!("Failed to write parquet: {}", e),
        })?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    debug!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}
