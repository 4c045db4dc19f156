//! Worker pool
//!
//! Runs a fixed number of transfer workers against one shared enumerator
//! and blocks until all of them have drained.
//!
//! Failure handling:
//! - the first failure recorded (by wall-clock) is the run's error, later
//!   ones are logged and dropped
//! - with `cancel_on_error` (the default) a failure stops every worker at
//!   its next pull; transfers already running are left to finish
//! - without it, the surviving workers keep draining the enumerator

use crate::config::PoolConfig;
use crate::core::command::{Launcher, ProcessLauncher};
use crate::core::worker::{PoolStats, SharedEnumerator, TransferWorker, WorkerContext, WorkerReport};
use crate::error::{MercurioError, Result};
use crate::fs::{PathEnumerator, ResolutionWarning};
use crate::progress::ProgressReporter;
use crossbeam::channel::unbounded;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Units transferred
    pub units_transferred: u64,
    /// Workers that took part
    pub workers: usize,
    /// Input paths or walk entries that were skipped
    pub skipped: usize,
    /// Wall-clock duration
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl RunSummary {
    /// Print summary to console
    pub fn print_summary(&self) {
        println!("Sent {} file(s) with {} worker(s) in {}",
            self.units_transferred,
            self.workers,
            humantime::format_duration(Duration::from_millis(self.duration.as_millis() as u64)),
        );
        if self.skipped > 0 {
            println!("Skipped {} path(s)", self.skipped);
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

/// Fixed-size pool of transfer workers bound to one enumerator
pub struct WorkerPool {
    config: PoolConfig,
    destination_root: String,
    enumerator: PathEnumerator,
    launcher: Arc<dyn Launcher>,
    progress: Option<Arc<ProgressReporter>>,
    stats: Arc<PoolStats>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create a pool sending the units of `enumerator` under `destination_root`
    pub fn new(enumerator: PathEnumerator, destination_root: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            config,
            destination_root: destination_root.into(),
            enumerator,
            launcher: Arc::new(ProcessLauncher),
            progress: None,
            stats: Arc::new(PoolStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `launcher` to run transfer commands
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Get statistics, updated while the run is in progress
    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Number of workers this pool will start
    pub fn workers(&self) -> usize {
        self.config.effective_workers()
    }

    /// Start every worker and wait for all of them to terminate
    pub fn run(self) -> Result<RunSummary> {
        let start_time = Instant::now();
        let workers = self.workers();
        let (failure_tx, failure_rx) = unbounded();

        if let Some(progress) = &self.progress {
            progress.set_status("Sending files...");
        }

        let context = Arc::new(WorkerContext {
            enumerator: SharedEnumerator::new(self.enumerator),
            destination_root: self.destination_root,
            tool: self.config.tool.clone(),
            launcher: self.launcher,
            cancel_on_error: self.config.cancel_on_error,
            cancelled: Arc::clone(&self.cancelled),
            failures: failure_tx,
            stats: Arc::clone(&self.stats),
            progress: self.progress.clone(),
        });

        tracing::debug!("starting {} worker(s)", workers);

        let mut handles = Vec::with_capacity(workers);
        let mut spawn_error = None;

        for worker_id in 0..workers {
            let worker = TransferWorker::new(worker_id, Arc::clone(&context));
            let stats = Arc::clone(&self.stats);
            stats.workers_running.fetch_add(1, Ordering::SeqCst);

            let spawned = thread::Builder::new()
                .name(format!("mercurio-worker-{worker_id}"))
                .spawn(move || {
                    let report = worker.run();
                    stats.workers_running.fetch_sub(1, Ordering::SeqCst);
                    report
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.stats.workers_running.fetch_sub(1, Ordering::SeqCst);
                    self.cancelled.store(true, Ordering::SeqCst);
                    spawn_error = Some(MercurioError::ThreadPoolError(format!(
                        "failed to start worker {worker_id}: {err}"
                    )));
                    break;
                }
            }
        }

        let mut reports: Vec<WorkerReport> = Vec::with_capacity(handles.len());
        let mut panicked = 0usize;
        for handle in handles {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => panicked += 1,
            }
        }

        if let Some(progress) = &self.progress {
            progress.finish();
        }

        let skipped: Vec<ResolutionWarning> = context.enumerator.skipped();

        if let Some(err) = spawn_error {
            return Err(err);
        }

        // Failures arrive in the order they were recorded
        let mut failures = failure_rx.try_iter();
        if let Some(first) = failures.next() {
            for other in failures {
                tracing::warn!("additional failure: {}", other);
            }
            return Err(first);
        }

        if panicked > 0 {
            return Err(MercurioError::ThreadPoolError(format!(
                "{panicked} worker(s) panicked"
            )));
        }

        let summary = RunSummary {
            units_transferred: reports.iter().map(|r| r.transferred).sum(),
            workers,
            skipped: skipped.len(),
            duration: start_time.elapsed(),
        };

        tracing::info!(
            "sent {} file(s) with {} worker(s) in {:.2?}",
            summary.units_transferred,
            summary.workers,
            summary.duration
        );

        Ok(summary)
    }
}

/// Send `paths` under `destination_root` with `workers` parallel transfers
///
/// `None` starts one worker per logical CPU.
pub fn run<P: AsRef<Path>>(paths: &[P], destination_root: &str, workers: Option<usize>) -> Result<RunSummary> {
    let config = PoolConfig {
        workers: workers.unwrap_or(0),
        ..Default::default()
    };
    send(paths, destination_root, config)
}

/// Send `paths` under `destination_root` with the given pool configuration
pub fn send<P: AsRef<Path>>(paths: &[P], destination_root: &str, config: PoolConfig) -> Result<RunSummary> {
    let enumerator = PathEnumerator::with_config(paths, config.enumerator.clone());
    WorkerPool::new(enumerator, destination_root, config).run()
}
