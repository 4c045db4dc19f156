//! Transfer workers
//!
//! A worker pulls one unit at a time from the shared enumerator and runs
//! the transfer tool for it, until the enumerator is exhausted, a transfer
//! fails, or the run is cancelled.

use crate::config::ToolConfig;
use crate::core::command::{Launcher, TransferCommand};
use crate::error::{MercurioError, Result};
use crate::fs::{PathEnumerator, ResolutionWarning, TransferUnit};
use crate::progress::ProgressReporter;
use crossbeam::channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// An enumerator shared between workers
///
/// Pulls are serialized: each unit is handed to exactly one caller.
pub struct SharedEnumerator {
    inner: Mutex<PathEnumerator>,
}

impl SharedEnumerator {
    /// Wrap an enumerator for concurrent pulls
    pub fn new(enumerator: PathEnumerator) -> Self {
        Self {
            inner: Mutex::new(enumerator),
        }
    }

    /// Pull the next unit, or `None` once the enumerator is exhausted
    pub fn pull(&self) -> Option<TransferUnit> {
        self.lock().pull()
    }

    /// Warnings emitted by the enumerator so far
    pub fn skipped(&self) -> Vec<ResolutionWarning> {
        self.lock().skipped().to_vec()
    }

    /// Number of units handed out so far
    pub fn yielded(&self) -> u64 {
        self.lock().yielded()
    }

    // A worker that panicked while holding the lock cannot have left the
    // cursor half-advanced, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, PathEnumerator> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Counters observable while a run is in progress
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Units handed out to workers
    pub units_pulled: AtomicU64,
    /// Units transferred successfully
    pub units_transferred: AtomicU64,
    /// Transfers currently running
    pub in_flight: AtomicUsize,
    /// Workers still running
    pub workers_running: AtomicUsize,
}

impl PoolStats {
    /// Units transferred so far
    pub fn transferred(&self) -> u64 {
        self.units_transferred.load(Ordering::Relaxed)
    }

    /// Transfers currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// State shared by every worker of one run
pub(crate) struct WorkerContext {
    pub(crate) enumerator: SharedEnumerator,
    pub(crate) destination_root: String,
    pub(crate) tool: ToolConfig,
    pub(crate) launcher: Arc<dyn Launcher>,
    pub(crate) cancel_on_error: bool,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) failures: Sender<MercurioError>,
    pub(crate) stats: Arc<PoolStats>,
    pub(crate) progress: Option<Arc<ProgressReporter>>,
}

impl WorkerContext {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record a failure; the first one recorded becomes the run's error
    fn record_failure(&self, worker_id: usize, err: MercurioError) {
        tracing::error!("worker {}: {}", worker_id, err);

        if self.cancel_on_error {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        // The receiver lives as long as the pool; a closed channel only
        // means the run is already being torn down.
        let _ = self.failures.send(err);
    }
}

/// What a worker did before it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker index
    pub id: usize,
    /// Units it transferred
    pub transferred: u64,
    /// Whether it stopped because a transfer failed
    pub failed: bool,
}

/// Send one unit with the transfer tool
///
/// Returns a [`MercurioError::Transfer`] when the tool exits with a
/// non-zero status and a [`MercurioError::Spawn`] when it cannot be run.
pub fn transfer_unit(
    launcher: &dyn Launcher,
    tool: &ToolConfig,
    unit: &TransferUnit,
    destination_root: &str,
) -> Result<()> {
    let command = TransferCommand::for_unit(tool, unit, destination_root);
    tracing::debug!("running: {}", command);

    match launcher.launch(&command) {
        Ok(0) => Ok(()),
        Ok(status) => Err(MercurioError::transfer(status, command.to_string())),
        Err(source) => Err(MercurioError::Spawn {
            command: command.to_string(),
            source,
        }),
    }
}

/// One worker of the pool
pub(crate) struct TransferWorker {
    id: usize,
    context: Arc<WorkerContext>,
}

impl TransferWorker {
    pub(crate) fn new(id: usize, context: Arc<WorkerContext>) -> Self {
        Self { id, context }
    }

    /// Transfer units until there are none left
    pub(crate) fn run(self) -> WorkerReport {
        let ctx = &self.context;
        let mut transferred = 0u64;

        tracing::debug!("worker {} starting", self.id);

        loop {
            if ctx.is_cancelled() {
                tracing::debug!("worker {} cancelled", self.id);
                break;
            }

            let Some(unit) = ctx.enumerator.pull() else {
                break;
            };
            ctx.stats.units_pulled.fetch_add(1, Ordering::Relaxed);

            if ctx.is_cancelled() {
                tracing::debug!("worker {} cancelled, dropping '{}'", self.id, unit.source.display());
                break;
            }

            if let Some(progress) = &ctx.progress {
                progress.set_current_file(&unit.source.to_string_lossy());
            }

            ctx.stats.in_flight.fetch_add(1, Ordering::Relaxed);
            let result = transfer_unit(ctx.launcher.as_ref(), &ctx.tool, &unit, &ctx.destination_root);
            ctx.stats.in_flight.fetch_sub(1, Ordering::Relaxed);

            match result {
                Ok(()) => {
                    transferred += 1;
                    ctx.stats.units_transferred.fetch_add(1, Ordering::Relaxed);
                    if let Some(progress) = &ctx.progress {
                        progress.increment_files(1);
                    }
                }
                Err(err) => {
                    ctx.record_failure(self.id, err);
                    tracing::debug!("worker {} stopping after failure", self.id);
                    return WorkerReport {
                        id: self.id,
                        transferred,
                        failed: true,
                    };
                }
            }
        }

        tracing::debug!("worker {} done, {} unit(s) sent", self.id, transferred);
        WorkerReport {
            id: self.id,
            transferred,
            failed: false,
        }
    }
}
