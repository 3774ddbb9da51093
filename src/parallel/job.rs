//! Units of batch work

use std::fmt;
use std::path::PathBuf;

/// Describes what a job works on, for progress labels and failure records.
pub trait JobPayload: Send + 'static {
    /// Stable identity used when recording a failure
    fn identity(&self) -> String;

    /// Human-readable label shown while reporting progress
    fn label(&self) -> String {
        self.identity()
    }
}

impl JobPayload for String {
    fn identity(&self) -> String {
        self.clone()
    }
}

impl JobPayload for &'static str {
    fn identity(&self) -> String {
        (*self).to_string()
    }
}

impl JobPayload for PathBuf {
    fn identity(&self) -> String {
        self.display().to_string()
    }

    fn label(&self) -> String {
        self.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.identity())
    }
}

type Action<P> = Box<dyn FnOnce(&P) -> anyhow::Result<()> + Send>;

/// One unit of work: an immutable payload plus the action that processes it.
///
/// A job carries no synchronization of its own. [`Job::run`] consumes it, so
/// the action can only ever execute once.
pub struct Job<P: JobPayload> {
    payload: P,
    action: Action<P>,
}

impl<P: JobPayload> Job<P> {
    /// Create a job from a payload and the action to run against it
    pub fn new<F>(payload: P, action: F) -> Self
    where
        F: FnOnce(&P) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            payload,
            action: Box::new(action),
        }
    }

    pub fn identity(&self) -> String {
        self.payload.identity()
    }

    pub fn label(&self) -> String {
        self.payload.label()
    }

    /// Execute the action on the calling thread
    pub fn run(self) -> anyhow::Result<()> {
        let Self { payload, action } = self;
        action(&payload)
    }
}

impl<P: JobPayload> fmt::Debug for Job<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("identity", &self.payload.identity())
            .finish_non_exhaustive()
    }
}
