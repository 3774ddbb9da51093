//! Failure sinks: where per-job errors go instead of aborting the batch

use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, warn};

use crate::error::DropmakerError;

/// Log target of per-job failure lines. The console layer drops it; the
/// failures are listed in the end-of-run summary instead.
pub const FAILURE_TARGET: &str = "dropmaker::failures";

/// Records a failed job. Called at most once per failed job, concurrently
/// from worker threads.
pub trait FailureSink: Send + Sync {
    fn record(&self, identity: &str, error: &anyhow::Error);
}

/// Sink that writes every failure to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureSink;

impl FailureSink for LogFailureSink {
    fn record(&self, identity: &str, error: &anyhow::Error) {
        if is_recoverable(error) {
            warn!(target: FAILURE_TARGET, item = %identity, "Failed to mutate {}: {:#}", identity, error);
        } else {
            error!(target: FAILURE_TARGET, item = %identity, "Failed to mutate {}: {:#}", identity, error);
        }
    }
}

/// True when `error` is a per-file problem with the input or output (bad
/// image, write failure, oversized target) rather than a panic or a bug.
pub fn is_recoverable(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<DropmakerError>()
        .is_some_and(DropmakerError::is_recoverable)
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub identity: String,
    pub message: String,
    /// See [`is_recoverable`]
    pub recoverable: bool,
}

/// Sink that keeps failures in memory for the final summary
#[derive(Debug, Default)]
pub struct CollectingFailureSink {
    records: Mutex<Vec<FailureRecord>>,
}

impl CollectingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded failures sorted by identity
    pub fn records(&self) -> Vec<FailureRecord> {
        let mut records = self
            .records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }
}

impl FailureSink for CollectingFailureSink {
    fn record(&self, identity: &str, error: &anyhow::Error) {
        if let Ok(mut records) = self.records.lock() {
            records.push(FailureRecord {
                identity: identity.to_string(),
                message: format!("{:#}", error),
                recoverable: is_recoverable(error),
            });
        }
    }
}

/// Forwards every failure to two sinks
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: FailureSink, B: FailureSink> Tee<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: FailureSink, B: FailureSink> FailureSink for Tee<A, B> {
    fn record(&self, identity: &str, error: &anyhow::Error) {
        self.first.record(identity, error);
        self.second.record(identity, error);
    }
}

impl<S: FailureSink + ?Sized> FailureSink for std::sync::Arc<S> {
    fn record(&self, identity: &str, error: &anyhow::Error) {
        (**self).record(identity, error);
    }
}
