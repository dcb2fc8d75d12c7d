//! Pipeline orchestration.
//!
//! Discovery, batch sizing, per-file aggregation on the worker pool, the
//! combine step, optional upload, and intermediate cleanup. Each stage lives
//! in its own module; `Pipeline` wires them together and owns the metrics.

pub mod aggregator;
pub mod batch_sizer;
pub mod combiner;
pub mod pivot;
pub mod timestamps;
pub mod worker_pool;

#[cfg(test)]
pub mod tests;

use self::aggregator::FileAggregator;
use self::batch_sizer::BatchSizer;
use self::combiner::Combiner;
use self::worker_pool::WorkerPool;

use crate::config::PipelineConfig;
use crate::constants::MEMORY_SAMPLE_INTERVAL_MS;
use crate::discovery::FileDiscovery;
use crate::error::{PivotError, Result};
use crate::metrics::{MetricsSnapshot, RunMetrics, spawn_memory_sampler};
use crate::models::{DiscoveredFile, FileLocation, FileReport, FileTask};
use crate::storage::{S3Store, TripFileSource, is_s3_uri, parse_s3_uri};

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::fs;
use tracing::{debug, info, warn};

/// Outcome of a run that reached the end of the aggregation stage
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub metrics: MetricsSnapshot,
    /// Final table, absent when no file succeeded
    pub final_table: Option<PathBuf>,
    /// Remote copy of the final table, when uploaded
    pub uploaded_to: Option<String>,
    /// Upload error, if the upload was attempted and failed
    pub upload_error: Option<String>,
}

impl RunSummary {
    /// A run where no file succeeded is a failure even though metrics exist
    pub fn into_result(self) -> Result<Self> {
        if self.metrics.files_succeeded == 0 {
            return Err(PivotError::NoFilesProcessed {
                files_total: self.metrics.files_total,
            });
        }
        Ok(self)
    }
}

/// End-to-end aggregation of trip files into one wide table
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            show_progress: false,
        }
    }

    /// Print stage headings and a progress bar to the terminal
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Discover input files, then process them
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let store = self.remote_store().await;

        self.heading("Discovering trip files...");
        let files = FileDiscovery::new(&self.config.input, &self.config.trip_file_marker)
            .with_max_files(self.config.max_files)
            .discover(store.as_deref())
            .await?;
        if self.show_progress {
            println!(
                "  {} {} trip files",
                "Found".bright_green(),
                files.len().to_string().bright_white().bold()
            );
        }

        self.run_with_store(files, store).await
    }

    /// Process an explicit file list
    pub async fn run_files(&self, files: Vec<DiscoveredFile>) -> Result<RunSummary> {
        self.config.validate()?;
        let needs_remote = files.iter().any(|f| f.location.is_remote());
        let store = if needs_remote || self.config.s3_output.is_some() {
            Some(Arc::new(S3Store::from_env().await))
        } else {
            None
        };
        self.run_with_store(files, store).await
    }

    async fn remote_store(&self) -> Option<Arc<S3Store>> {
        if is_s3_uri(&self.config.input) || self.config.s3_output.is_some() {
            Some(Arc::new(S3Store::from_env().await))
        } else {
            None
        }
    }

    async fn run_with_store(
        &self,
        files: Vec<DiscoveredFile>,
        store: Option<Arc<S3Store>>,
    ) -> Result<RunSummary> {
        if files.is_empty() {
            return Err(PivotError::NoInputFiles {
                input: self.config.input.clone(),
            });
        }

        let mut metrics = RunMetrics::new(files.len());
        let sampler = spawn_memory_sampler(
            metrics.peak_memory_handle(),
            Duration::from_millis(MEMORY_SAMPLE_INTERVAL_MS),
        );
        let result = self.execute(files, store, &mut metrics).await;
        sampler.abort();
        result
    }

    async fn execute(
        &self,
        files: Vec<DiscoveredFile>,
        store: Option<Arc<S3Store>>,
        metrics: &mut RunMetrics,
    ) -> Result<RunSummary> {
        let intermediate_dir = self.config.intermediate_dir();
        fs::create_dir_all(&intermediate_dir).await?;
        let staging = tempfile::Builder::new()
            .prefix(".staging")
            .tempdir_in(&self.config.output_dir)?;

        // Batch size, sampled from the first file
        let estimate = {
            let sizer = BatchSizer::from_config(&self.config);
            let needs_sample =
                self.config.batch_size_override.is_none() && !self.config.skip_batch_optimization;
            let sample = if needs_sample {
                self.sample_source(&files[0], store.as_deref(), staging.path())
                    .await
            } else {
                None
            };
            // Sampling collects through polars, which must stay off the runtime threads
            let config = self.config.clone();
            let fallback = sizer.clone();
            match tokio::task::spawn_blocking(move || {
                let source = sample.as_ref().map(|(source, _)| source);
                sizer.resolve(&config, source)
            })
            .await
            {
                Ok(estimate) => estimate,
                Err(e) => {
                    warn!("Batch sizing task failed: {}", e);
                    fallback.resolve(&self.config, None)
                }
            }
        };
        metrics.set_batch_size(estimate.batch_size);

        // Per-file aggregation
        self.heading("Processing files...");
        let tasks: Vec<FileTask> = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| FileTask { index, file })
            .collect();

        let aggregator =
            FileAggregator::new(estimate.batch_size, self.config.min_rides, &intermediate_dir);
        let mut pool = WorkerPool::new(self.config.workers, aggregator, staging.path());
        if let Some(store) = &store {
            pool = pool.with_remote(Arc::clone(store));
        }
        let progress = self.progress_bar(tasks.len());
        if let Some(progress) = &progress {
            pool = pool.with_progress(progress.clone());
        }
        let reports = pool.run(tasks, metrics).await;
        if let Some(progress) = progress {
            progress.finish_with_message("Files processed");
        }

        if metrics.files_succeeded() == 0 {
            warn!(
                "None of the {} files were processed successfully",
                metrics.files_total()
            );
            if !self.config.keep_intermediate {
                let _ = fs::remove_dir(&intermediate_dir).await;
            }
            return Ok(RunSummary {
                metrics: metrics.snapshot(),
                final_table: None,
                uploaded_to: None,
                upload_error: None,
            });
        }

        // Combine
        self.heading("Combining intermediate tables...");
        let artifacts = successful_artifacts(&reports);
        let final_path = self.config.final_table_path();
        let combiner = Combiner::new(&final_path);
        let to_merge = artifacts.clone();
        let outcome = tokio::task::spawn_blocking(move || combiner.combine(&to_merge))
            .await
            .map_err(|e| PivotError::ProcessingFailed {
                path: final_path,
                reason: format!("Failed to spawn combine task: {}", e),
            })??;
        metrics.record_final_table(outcome.rows, outcome.trips);
        info!(
            "Wrote {} ({} rows, {} trips)",
            outcome.path.display(),
            outcome.rows,
            outcome.trips
        );

        // Upload
        let (uploaded_to, upload_error) = match (&self.config.s3_output, &store) {
            (Some(uri), Some(store)) => match upload(store, &outcome.path, uri).await {
                Ok(()) => (Some(uri.clone()), None),
                Err(e) => {
                    warn!("Upload to {} failed: {}", uri, e);
                    (None, Some(e.to_string()))
                }
            },
            _ => (None, None),
        };

        if !self.config.keep_intermediate {
            remove_intermediates(&artifacts, &intermediate_dir).await;
        }

        Ok(RunSummary {
            metrics: metrics.snapshot(),
            final_table: Some(outcome.path),
            uploaded_to,
            upload_error,
        })
    }

    /// Local handle on the first file for batch sizing; remote files are staged
    async fn sample_source(
        &self,
        file: &DiscoveredFile,
        store: Option<&S3Store>,
        staging_dir: &Path,
    ) -> Option<(TripFileSource, Option<TempPath>)> {
        let (path, staged) = match &file.location {
            FileLocation::Local(path) => (path.clone(), None),
            FileLocation::S3 { bucket, key } => {
                let staged = match store?.stage(bucket, key, staging_dir).await {
                    Ok(staged) => staged,
                    Err(e) => {
                        warn!("Could not stage {} for sizing: {}", file.location, e);
                        return None;
                    }
                };
                (staged.to_path_buf(), Some(staged))
            }
        };
        match TripFileSource::open(path) {
            Ok(source) => Some((source, staged)),
            Err(e) => {
                debug!("Sizing sample unavailable: {}", e);
                None
            }
        }
    }

    fn heading(&self, text: &str) {
        if self.show_progress {
            println!("\n{}", text.bright_yellow());
        }
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message("Processing files");
        Some(pb)
    }
}

/// Artifacts of successful files, in discovery order
fn successful_artifacts(reports: &[FileReport]) -> Vec<PathBuf> {
    reports
        .iter()
        .filter(|report| report.succeeded())
        .filter_map(|report| report.artifact.clone())
        .collect()
}

async fn upload(store: &S3Store, path: &Path, uri: &str) -> Result<()> {
    let (bucket, key) = parse_s3_uri(uri)
        .ok_or_else(|| PivotError::configuration(format!("invalid S3 URI: {}", uri)))?;
    store.upload_file(path, &bucket, &key).await
}

/// Best effort; a leftover artifact is logged, not fatal
async fn remove_intermediates(artifacts: &[PathBuf], dir: &Path) {
    for artifact in artifacts {
        if let Err(e) = fs::remove_file(artifact).await {
            warn!("Could not remove {}: {}", artifact.display(), e);
        }
    }
    if fs::remove_dir(dir).await.is_ok() {
        debug!("Removed {}", dir.display());
    }
}
