//! Run metrics: per-file reports folded on one collector, plus peak memory.
//!
//! Workers never touch shared counters. Each returns a [`FileReport`] and the
//! pool hands it to [`RunMetrics::record_file`] on a single task. Peak RSS is
//! the only shared value and is kept in an atomic fed by a sampler task.

use crate::error::FileFailure;
use crate::models::{DiscardCounts, FileReport};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tracing::debug;

/// Serializable end-of-run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub input_row_count: u64,
    /// Wide rows in the final table
    pub output_row_count: u64,
    /// Sum of every hour cell in the final table
    pub output_trip_count: u64,
    pub discarded_row_count: u64,
    pub discards: DiscardCounts,
    /// Rows kept despite falling outside their file's month
    pub period_mismatch_rows: u64,
    pub files_total: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub failures: Vec<FileFailure>,
    pub batch_size: usize,
    pub peak_memory_bytes: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Every input row is either in the final table or discarded with a reason
    pub fn is_conserved(&self) -> bool {
        self.output_trip_count + self.discarded_row_count == self.input_row_count
    }

    pub fn peak_memory_mb(&self) -> f64 {
        self.peak_memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug)]
pub struct RunMetrics {
    started: Instant,
    input_rows: u64,
    retained_trips: u64,
    output_rows: u64,
    output_trips: u64,
    discards: DiscardCounts,
    period_mismatch: u64,
    files_total: usize,
    files_succeeded: usize,
    failures: Vec<FileFailure>,
    batch_size: usize,
    peak_memory: Arc<AtomicU64>,
}

impl RunMetrics {
    pub fn new(files_total: usize) -> Self {
        Self {
            started: Instant::now(),
            input_rows: 0,
            retained_trips: 0,
            output_rows: 0,
            output_trips: 0,
            discards: DiscardCounts::default(),
            period_mismatch: 0,
            files_total,
            files_succeeded: 0,
            failures: Vec::new(),
            batch_size: 0,
            peak_memory: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
    }

    /// Fold one finished file
    pub fn record_file(&mut self, report: &FileReport) {
        self.input_rows += report.input_rows;
        self.retained_trips += report.retained_trips;
        self.discards.merge(&report.discards);
        self.period_mismatch += report.period_mismatch;
        match &report.failure {
            Some(failure) => self.failures.push(failure.clone()),
            None if report.succeeded() => self.files_succeeded += 1,
            None => {}
        }
    }

    /// Record the combined table's size
    pub fn record_final_table(&mut self, rows: u64, trips: u64) {
        self.output_rows = rows;
        self.output_trips = trips;
        if trips != self.retained_trips {
            debug!(
                "Final table holds {} trips, per-file artifacts reported {}",
                trips, self.retained_trips
            );
        }
    }

    pub fn files_succeeded(&self) -> usize {
        self.files_succeeded
    }

    pub fn files_total(&self) -> usize {
        self.files_total
    }

    pub fn observe_memory(&self, bytes: u64) {
        self.peak_memory.fetch_max(bytes, Ordering::Relaxed);
    }

    /// Shared peak cell for a background sampler
    pub fn peak_memory_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.peak_memory)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            input_row_count: self.input_rows,
            output_row_count: self.output_rows,
            output_trip_count: self.output_trips,
            discarded_row_count: self.discards.total(),
            discards: self.discards,
            period_mismatch_rows: self.period_mismatch,
            files_total: self.files_total,
            files_succeeded: self.files_succeeded,
            files_failed: self.failures.len(),
            failures: self.failures.clone(),
            batch_size: self.batch_size,
            peak_memory_bytes: self.peak_memory.load(Ordering::Relaxed),
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

/// Resident memory of the current process via sysinfo
#[derive(Debug)]
pub struct MemoryMonitor {
    system: System,
    pid: Option<Pid>,
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Current RSS in bytes, if the platform reports it
    pub fn current_rss(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system.process(pid).map(|process| process.memory())
    }

    /// Sample once into `peak`
    pub fn sample_into(&mut self, peak: &AtomicU64) {
        if let Some(rss) = self.current_rss() {
            peak.fetch_max(rss, Ordering::Relaxed);
        }
    }
}

/// Sample RSS every `interval` until the handle is aborted
pub fn spawn_memory_sampler(peak: Arc<AtomicU64>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut monitor = MemoryMonitor::new();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            monitor.sample_into(&peak);
        }
    })
}
