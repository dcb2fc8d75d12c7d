//! Bounded concurrent dispatch of file tasks.
//!
//! Tasks are grouped by inferred month and groups run in chronological
//! order; files without a period form the last group. Inside a group at most
//! `workers` files are in flight, each aggregated on the blocking pool.

use crate::error::{FileFailure, FileStage};
use crate::metrics::{MemoryMonitor, RunMetrics};
use crate::models::{FileLocation, FileReport, FileTask, Period};
use crate::processor::aggregator::FileAggregator;
use crate::storage::S3Store;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Group tasks by period, chronological, with unknown periods last
pub fn group_by_period(tasks: Vec<FileTask>) -> Vec<(Option<Period>, Vec<FileTask>)> {
    let mut dated: BTreeMap<Period, Vec<FileTask>> = BTreeMap::new();
    let mut undated = Vec::new();
    for task in tasks {
        match task.file.period {
            Some(period) => dated.entry(period).or_default().push(task),
            None => undated.push(task),
        }
    }

    let mut groups: Vec<(Option<Period>, Vec<FileTask>)> = dated
        .into_iter()
        .map(|(period, tasks)| (Some(period), tasks))
        .collect();
    if !undated.is_empty() {
        groups.push((None, undated));
    }
    groups
}

pub struct WorkerPool {
    workers: usize,
    aggregator: Arc<FileAggregator>,
    remote: Option<Arc<S3Store>>,
    staging_dir: PathBuf,
    progress: Option<ProgressBar>,
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        aggregator: FileAggregator,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workers: workers.max(1),
            aggregator: Arc::new(aggregator),
            remote: None,
            staging_dir: staging_dir.into(),
            progress: None,
        }
    }

    pub fn with_remote(mut self, store: Arc<S3Store>) -> Self {
        self.remote = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Process every task and fold each report into `metrics` as it arrives.
    ///
    /// Returns the reports ordered by task index.
    pub async fn run(&self, tasks: Vec<FileTask>, metrics: &mut RunMetrics) -> Vec<FileReport> {
        let mut monitor = MemoryMonitor::new();
        let mut reports: Vec<(usize, FileReport)> = Vec::with_capacity(tasks.len());

        for (period, group) in group_by_period(tasks) {
            match period {
                Some(period) => info!("Processing {} file(s) for {}", group.len(), period),
                None => warn!(
                    "Processing {} file(s) with no inferable period; month checks skipped",
                    group.len()
                ),
            }

            let mut in_flight = stream::iter(group)
                .map(|task| async move {
                    let index = task.index;
                    (index, self.process_task(task).await)
                })
                .buffer_unordered(self.workers);

            while let Some((index, report)) = in_flight.next().await {
                metrics.record_file(&report);
                if let Some(rss) = monitor.current_rss() {
                    metrics.observe_memory(rss);
                }
                if let Some(progress) = &self.progress {
                    progress.inc(1);
                    progress.set_message(report.file.clone());
                }
                reports.push((index, report));
            }
        }

        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    async fn process_task(&self, task: FileTask) -> FileReport {
        let file_id = task.file.location.to_string();
        let period = task.file.period;

        // staged remote files live until the aggregation below returns
        let (path, _staged) = match &task.file.location {
            FileLocation::Local(path) => (path.clone(), None),
            FileLocation::S3 { bucket, key } => {
                let Some(store) = &self.remote else {
                    return failed_before_start(file_id, period, "no S3 client configured");
                };
                match store.stage(bucket, key, &self.staging_dir).await {
                    Ok(staged) => (staged.to_path_buf(), Some(staged)),
                    Err(e) => return failed_before_start(file_id, period, e),
                }
            }
        };

        debug!("Dispatching {} to the blocking pool", file_id);
        let aggregator = Arc::clone(&self.aggregator);
        match tokio::task::spawn_blocking(move || aggregator.run(&task, &path)).await {
            Ok(report) => report,
            Err(join_error) => failed_before_start(file_id, period, join_error),
        }
    }
}

/// Report for a file that never reached the aggregator (staging failed or
/// the worker panicked); its rows are unknown and counted as zero.
fn failed_before_start(
    file: String,
    period: Option<Period>,
    cause: impl std::fmt::Display,
) -> FileReport {
    let failure = FileFailure::new(file.clone(), FileStage::Discovered, cause);
    error!("{}", failure);
    let mut report = FileReport::new(file, period);
    report.failure = Some(failure);
    report
}
