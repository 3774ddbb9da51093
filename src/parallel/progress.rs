//! Progress reporting for parallel operations

use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

/// Receives progress notifications from executor workers.
///
/// Calls arrive concurrently from up to `capacity` worker threads and are not
/// serialized by the executor.
pub trait ProgressReporter: Send + Sync {
    /// A job is about to run
    fn started(&self, _label: &str) {}

    /// A job finished, successfully or not. Called exactly once per started job.
    fn tick(&self, label: &str);
}

/// Reporter that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn tick(&self, _label: &str) {}
}

/// Thread-safe counting reporter
///
/// Keeps started and finished counts.
#[derive(Debug, Default)]
pub struct CountingReporter {
    started: AtomicUsize,
    ticks: AtomicUsize,
}

impl CountingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl ProgressReporter for CountingReporter {
    fn started(&self, _label: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn tick(&self, _label: &str) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Console progress bar
///
/// The bar position counts finished jobs; the message shows the file most
/// recently picked up by a worker.
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    /// Create a visible bar for `total` jobs
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.yellow} [{elapsed_precise}] [{wide_bar:.yellow/red}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("─>-");
        bar.set_style(style);
        bar.set_message("Processing...");
        Self { bar }
    }

    /// Create a bar that draws nothing (quiet or JSON output)
    pub fn hidden(total: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total);
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("Processing complete");
    }

    /// Leave the bar on screen as-is, e.g. after cancellation
    pub fn abandon(&self) {
        self.bar.abandon_with_message("Cancelled");
    }
}

impl ProgressReporter for BarReporter {
    fn started(&self, label: &str) {
        self.bar.set_message(format!("Processing {}...", label));
    }

    fn tick(&self, label: &str) {
        self.bar.inc(1);
        debug!("Finished {}", label);
    }
}
