//! Bounded-parallelism job execution
//!
//! [`BoundedExecutor`] fans independent [`Job`]s out over worker threads with
//! a fixed concurrency cap. Progress goes to a [`ProgressReporter`], failures
//! to a [`FailureSink`]; neither stops the batch.

pub mod cancel;
pub mod executor;
pub mod failure;
pub mod job;
pub mod permit;
pub mod progress;

pub use cancel::CancelToken;
pub use executor::{BoundedExecutor, RunReport};
pub use failure::{CollectingFailureSink, FailureRecord, FailureSink, LogFailureSink, Tee};
pub use job::{Job, JobPayload};
pub use permit::{Permit, PermitPool};
pub use progress::{BarReporter, CountingReporter, NoopReporter, ProgressReporter};
