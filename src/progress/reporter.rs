//! Progress reporter implementation
//!
//! The number of files to send is not known in advance, so progress is a
//! spinner showing the file currently being sent and a running count.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Progress reporter for send operations
pub struct ProgressReporter {
    /// Spinner line
    spinner: ProgressBar,
    /// Files sent so far
    files_sent: AtomicU64,
    /// Is progress enabled
    enabled: AtomicBool,
}

impl ProgressReporter {
    /// Create a new progress reporter drawing to stderr
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(Self::style());
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self::with_spinner(spinner, true)
    }

    /// Create a disabled progress reporter (for quiet mode)
    ///
    /// Nothing is drawn and no ticker thread is started.
    pub fn disabled() -> Self {
        let spinner = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());
        Self::with_spinner(spinner, false)
    }

    fn with_spinner(spinner: ProgressBar, enabled: bool) -> Self {
        Self {
            spinner,
            files_sent: AtomicU64::new(0),
            enabled: AtomicBool::new(enabled),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {pos} file(s) sent {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    /// Increment files sent
    pub fn increment_files(&self, count: u64) {
        self.files_sent.fetch_add(count, Ordering::Relaxed);
        self.spinner.inc(count);
    }

    /// Set current status message
    pub fn set_status(&self, msg: &str) {
        self.spinner.set_message(msg.to_string());
    }

    /// Set current file being sent
    pub fn set_current_file(&self, path: &str) {
        // Truncate long paths
        let display = if path.chars().count() > 60 {
            let tail: String = path.chars().rev().take(57).collect::<Vec<_>>().into_iter().rev().collect();
            format!("...{tail}")
        } else {
            path.to_string()
        };
        self.spinner.set_message(display);
    }

    /// Files sent so far
    pub fn files_sent(&self) -> u64 {
        self.files_sent.load(Ordering::Relaxed)
    }

    /// Stop the spinner, leaving the final count on screen
    pub fn finish(&self) {
        self.spinner.finish_with_message("done");
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter() {
        let reporter = ProgressReporter::disabled();
        assert!(!reporter.is_enabled());
        assert!(reporter.spinner.is_hidden());

        reporter.set_current_file("/a/very/long/path/that/keeps/going/and/going/and/going/until/it/is/truncated.bin");
        reporter.increment_files(2);
        reporter.increment_files(3);
        reporter.finish();

        assert_eq!(reporter.files_sent(), 5);
    }
}
