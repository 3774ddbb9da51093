//! Bounded executor: runs submitted jobs on worker threads, never more than
//! `capacity` at once.
//!
//! The executor is single use. Jobs are queued with [`BoundedExecutor::submit`]
//! and [`BoundedExecutor::run_all`] drains the queue in submission order: for
//! each job it takes a permit from a [`PermitPool`] (blocking while all are
//! held), then hands job and permit to a fresh scoped worker thread. The
//! permit goes back to the pool when the worker ends, however it ends.
//!
//! Per-job failures, returned errors and panics alike, are caught at the
//! worker boundary, forwarded to the [`FailureSink`] and counted. They never
//! propagate out of `run_all`.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::failure::{FailureSink, LogFailureSink};
use super::job::{Job, JobPayload};
use super::permit::{Acquire, Permit, PermitPool};
use super::progress::{NoopReporter, ProgressReporter};
use crate::error::{DropmakerError, Result};

/// How often a blocked admission re-checks the cancellation token
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Accepting,
    Running,
    Finished,
}

struct Queue<P: JobPayload> {
    state: RunState,
    pending: VecDeque<Job<P>>,
}

/// Runs jobs concurrently with a fixed upper bound on jobs in flight
pub struct BoundedExecutor<P: JobPayload> {
    capacity: usize,
    queue: Mutex<Queue<P>>,
    reporter: Arc<dyn ProgressReporter>,
    failures: Arc<dyn FailureSink>,
    cancel: Option<CancelToken>,
}

/// Outcome of [`BoundedExecutor::run_all`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub capacity: usize,
    pub submitted: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs never started because the run was cancelled
    pub abandoned: usize,
    /// Admissions that found every permit taken and had to wait
    pub permit_waits: usize,
    pub peak_in_flight: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.completed - self.failed
    }

    /// True when every submitted job was started
    pub fn is_complete(&self) -> bool {
        self.abandoned == 0
    }

    pub fn jobs_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }
}

impl<P: JobPayload> BoundedExecutor<P> {
    /// Create an executor allowing `capacity` concurrent jobs.
    ///
    /// Fails with [`DropmakerError::InvalidConfiguration`] when `capacity` is
    /// zero, negative or does not fit in `usize`.
    pub fn new<C>(capacity: C) -> Result<Self>
    where
        C: TryInto<usize> + fmt::Display + Copy,
    {
        let capacity = match capacity.try_into() {
            Ok(capacity) if capacity >= 1 => capacity,
            _ => {
                return Err(DropmakerError::invalid_configuration(format!(
                    "executor capacity must be at least 1, got {}",
                    capacity
                )))
            }
        };

        Ok(Self {
            capacity,
            queue: Mutex::new(Queue {
                state: RunState::Accepting,
                pending: VecDeque::new(),
            }),
            reporter: Arc::new(NoopReporter),
            failures: Arc::new(LogFailureSink),
            cancel: None,
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_failure_sink(mut self, failures: Arc<dyn FailureSink>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_cancellation(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Jobs queued and not yet handed to `run_all`
    pub fn pending(&self) -> usize {
        self.lock_queue().pending.len()
    }

    /// Queue a job. Rejected with [`DropmakerError::IllegalState`] once
    /// `run_all` has started; a rejected job is dropped without running.
    pub fn submit(&self, job: Job<P>) -> Result<()> {
        let mut queue = self.lock_queue();
        match queue.state {
            RunState::Accepting => {
                queue.pending.push_back(job);
                Ok(())
            }
            RunState::Running | RunState::Finished => Err(DropmakerError::illegal_state(format!(
                "cannot submit {} after run_all has started",
                job.identity()
            ))),
        }
    }

    /// Run every submitted job and wait for all of them.
    ///
    /// Only fails on misuse: calling it a second time.
    pub fn run_all(&self) -> Result<RunReport> {
        let jobs = {
            let mut queue = self.lock_queue();
            if queue.state != RunState::Accepting {
                return Err(DropmakerError::illegal_state(
                    "run_all may only be called once per executor",
                ));
            }
            queue.state = RunState::Running;
            std::mem::take(&mut queue.pending)
        };

        let report = self.execute(jobs);
        self.lock_queue().state = RunState::Finished;
        Ok(report)
    }

    fn execute(&self, mut jobs: VecDeque<Job<P>>) -> RunReport {
        let start_time = Instant::now();
        let mut report = RunReport {
            capacity: self.capacity,
            submitted: jobs.len(),
            ..RunReport::default()
        };

        if jobs.is_empty() {
            debug!("No jobs submitted, nothing to run");
            return report;
        }

        info!(
            "Running {} jobs with up to {} in flight",
            report.submitted, self.capacity
        );

        let pool = PermitPool::new(self.capacity);
        let completed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        thread::scope(|scope| {
            let (completed, failed) = (&completed, &failed);

            while let Some(job) = jobs.pop_front() {
                let Some(permit) = self.admit(&pool, &mut report.permit_waits) else {
                    jobs.push_front(job);
                    break;
                };
                report.started += 1;

                let identity = job.identity();
                let label = job.label();
                let spawned = thread::Builder::new()
                    .name(format!("dropmaker-worker-{}", report.started))
                    .spawn_scoped(scope, move || {
                        let _permit = permit;
                        let succeeded = panic::catch_unwind(AssertUnwindSafe(|| self.run_one(job)))
                            .unwrap_or_else(|payload| {
                                warn!("Progress or failure collaborator panicked: {}", panic_message(&*payload));
                                false
                            });
                        if !succeeded {
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                        completed.fetch_add(1, Ordering::SeqCst);
                    });

                // The closure, job and permit included, is dropped when the
                // spawn fails; account for the job here instead.
                if let Err(err) = spawned {
                    let err = anyhow::Error::new(err).context("failed to spawn worker thread");
                    self.failures.record(&identity, &err);
                    self.reporter.tick(&label);
                    failed.fetch_add(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        report.abandoned = jobs.len();
        report.completed = completed.load(Ordering::SeqCst);
        report.failed = failed.load(Ordering::SeqCst);
        report.peak_in_flight = pool.peak();
        report.elapsed = start_time.elapsed();

        if report.abandoned > 0 {
            warn!(
                "Run cancelled: {} of {} jobs were never started",
                report.abandoned, report.submitted
            );
        }
        info!(
            "Finished {} jobs ({} failed) in {:.2}s",
            report.completed,
            report.failed,
            report.elapsed.as_secs_f64()
        );

        report
    }

    /// Wait for a permit unless the run is cancelled
    fn admit<'p>(&self, pool: &'p PermitPool, permit_waits: &mut usize) -> Option<Permit<'p>> {
        if self.is_cancelled() {
            return None;
        }
        if let Some(permit) = pool.try_acquire() {
            return Some(permit);
        }

        *permit_waits += 1;
        let Some(token) = &self.cancel else {
            return Some(pool.acquire());
        };

        loop {
            match pool.acquire_timeout(CANCEL_POLL_INTERVAL) {
                Acquire::Granted(_) if token.is_cancelled() => return None,
                Acquire::Granted(permit) => return Some(permit),
                Acquire::TimedOut if token.is_cancelled() => return None,
                Acquire::TimedOut => {}
            }
        }
    }

    /// Worker boundary for one job. Returns whether the job succeeded.
    fn run_one(&self, job: Job<P>) -> bool {
        let identity = job.identity();
        let label = job.label();

        self.reporter.started(&label);
        debug!("Started {}", identity);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run())).unwrap_or_else(|payload| {
            Err(anyhow::anyhow!("job panicked: {}", panic_message(&*payload)))
        });

        let succeeded = match outcome {
            Ok(()) => true,
            Err(error) => {
                self.failures.record(&identity, &error);
                false
            }
        };

        self.reporter.tick(&label);
        succeeded
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn lock_queue(&self) -> MutexGuard<'_, Queue<P>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: JobPayload> fmt::Debug for BoundedExecutor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.lock_queue();
        f.debug_struct("BoundedExecutor")
            .field("capacity", &self.capacity)
            .field("state", &queue.state)
            .field("pending", &queue.pending.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::failure::CollectingFailureSink;
    use crate::parallel::progress::CountingReporter;
    use std::sync::Barrier;

    /// Tracks how many instrumented jobs run at once and in which order they start
    #[derive(Default)]
    struct Tracker {
        active: AtomicUsize,
        peak: AtomicUsize,
        runs: AtomicUsize,
        starts: Mutex<Vec<usize>>,
    }

    impl Tracker {
        fn enter(&self, index: usize) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.starts.lock().unwrap().push(index);
        }

        fn leave(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn tracked_job(tracker: &Arc<Tracker>, index: usize, fail: bool) -> Job<String> {
        let tracker = Arc::clone(tracker);
        Job::new(format!("job-{}", index), move |_: &String| {
            tracker.enter(index);
            thread::sleep(Duration::from_millis(5));
            tracker.leave();
            if fail {
                anyhow::bail!("job {} failed", index);
            }
            Ok(())
        })
    }

    fn instrumented(
        capacity: usize,
    ) -> (BoundedExecutor<String>, Arc<CountingReporter>, Arc<CollectingFailureSink>) {
        let reporter = Arc::new(CountingReporter::new());
        let failures = Arc::new(CollectingFailureSink::new());
        let executor = BoundedExecutor::new(capacity)
            .unwrap()
            .with_reporter(reporter.clone())
            .with_failure_sink(failures.clone());
        (executor, reporter, failures)
    }

    #[test]
    fn test_rejects_non_positive_capacity() {
        let zero = BoundedExecutor::<String>::new(0);
        assert!(matches!(zero, Err(DropmakerError::InvalidConfiguration { .. })));

        let negative = BoundedExecutor::<String>::new(-1);
        assert!(matches!(negative, Err(DropmakerError::InvalidConfiguration { .. })));

        assert!(BoundedExecutor::<String>::new(1).is_ok());
    }

    #[test]
    fn test_empty_run_returns_zero_report() {
        let (executor, reporter, failures) = instrumented(3);

        let report = executor.run_all().unwrap();

        assert_eq!(report.submitted, 0);
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(reporter.started_count(), 0);
        assert_eq!(reporter.tick_count(), 0);
        assert!(failures.is_empty());
    }

    #[test]
    fn test_every_job_runs_exactly_once() {
        for capacity in 1..=4 {
            for count in [0, 1, 3, 8] {
                let (executor, reporter, _) = instrumented(capacity);
                let tracker = Arc::new(Tracker::default());
                for index in 0..count {
                    executor.submit(tracked_job(&tracker, index, false)).unwrap();
                }

                let report = executor.run_all().unwrap();

                assert_eq!(report.started, count);
                assert_eq!(report.completed, count);
                assert_eq!(tracker.runs.load(Ordering::SeqCst), count);
                assert_eq!(reporter.tick_count(), count);
                assert_eq!(tracker.active.load(Ordering::SeqCst), 0);
            }
        }
    }

    #[test]
    fn test_in_flight_never_exceeds_capacity() {
        let (executor, _, _) = instrumented(3);
        let tracker = Arc::new(Tracker::default());
        for index in 0..20 {
            executor.submit(tracked_job(&tracker, index, false)).unwrap();
        }

        let report = executor.run_all().unwrap();

        assert!(tracker.peak.load(Ordering::SeqCst) <= 3);
        assert!(report.peak_in_flight <= 3);
        assert!(report.permit_waits > 0);
    }

    #[test]
    fn test_capacity_covering_batch_never_blocks() {
        const JOBS: usize = 4;
        let (executor, _, _) = instrumented(JOBS);
        // Every job waits for all the others, so this only finishes when all
        // of them are running at the same time.
        let barrier = Arc::new(Barrier::new(JOBS));
        for index in 0..JOBS {
            let barrier = Arc::clone(&barrier);
            executor
                .submit(Job::new(format!("job-{}", index), move |_: &String| {
                    barrier.wait();
                    Ok(())
                }))
                .unwrap();
        }

        let report = executor.run_all().unwrap();

        assert_eq!(report.permit_waits, 0);
        assert_eq!(report.completed, JOBS);
        assert_eq!(report.peak_in_flight, JOBS);
    }

    #[test]
    fn test_capacity_above_batch_size_never_blocks() {
        let (executor, reporter, failures) = instrumented(8);
        let barrier = Arc::new(Barrier::new(3));
        for index in 0..3 {
            let barrier = Arc::clone(&barrier);
            executor
                .submit(Job::new(format!("job-{}", index), move |_: &String| {
                    barrier.wait();
                    Ok(())
                }))
                .unwrap();
        }

        let report = executor.run_all().unwrap();

        assert_eq!(report.capacity, 8);
        assert_eq!(report.permit_waits, 0);
        assert_eq!(report.completed, 3);
        assert_eq!(report.peak_in_flight, 3);
        assert_eq!(reporter.tick_count(), 3);
        assert!(failures.is_empty());
    }

    #[test]
    fn test_one_failure_among_five_with_capacity_two() {
        let (executor, reporter, failures) = instrumented(2);
        let tracker = Arc::new(Tracker::default());
        for index in 1..=5 {
            executor.submit(tracked_job(&tracker, index, index == 3)).unwrap();
        }

        let report = executor.run_all().unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 5);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(reporter.tick_count(), 5);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures.records()[0].identity, "job-3");
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_panicking_job_is_contained() {
        let (executor, reporter, failures) = instrumented(2);
        let tracker = Arc::new(Tracker::default());
        executor.submit(tracked_job(&tracker, 0, false)).unwrap();
        executor
            .submit(Job::new("explodes".to_string(), |_: &String| -> anyhow::Result<()> {
                panic!("decoder bug")
            }))
            .unwrap();
        executor.submit(tracked_job(&tracker, 2, false)).unwrap();
        executor.submit(tracked_job(&tracker, 3, true)).unwrap();

        let report = executor.run_all().unwrap();

        assert_eq!(report.completed, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(reporter.tick_count(), 4);
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 3);

        let records = failures.records();
        assert_eq!(records.len(), 2);
        let panicked = records.iter().find(|r| r.identity == "explodes").unwrap();
        assert!(panicked.message.contains("decoder bug"));
    }

    #[test]
    fn test_capacity_one_runs_in_submission_order() {
        let (executor, _, _) = instrumented(1);
        let tracker = Arc::new(Tracker::default());
        for index in 0..6 {
            executor.submit(tracked_job(&tracker, index, index % 2 == 0)).unwrap();
        }

        executor.run_all().unwrap();

        assert_eq!(*tracker.starts.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_submit_after_run_is_rejected() {
        let (executor, reporter, _) = instrumented(2);
        let tracker = Arc::new(Tracker::default());
        executor.submit(tracked_job(&tracker, 0, false)).unwrap();
        executor.run_all().unwrap();

        let late = executor.submit(tracked_job(&tracker, 1, false));

        assert!(matches!(late, Err(DropmakerError::IllegalState { .. })));
        assert_eq!(executor.pending(), 0);
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.tick_count(), 1);
    }

    #[test]
    fn test_submit_while_running_is_rejected() {
        let executor = Arc::new(BoundedExecutor::<String>::new(2).unwrap());
        let rejected = Arc::new(Mutex::new(None));
        let ran_late_job = Arc::new(AtomicUsize::new(0));

        let handle = Arc::clone(&executor);
        let slot = Arc::clone(&rejected);
        let ran = Arc::clone(&ran_late_job);
        executor
            .submit(Job::new("submitter".to_string(), move |_: &String| {
                let ran = Arc::clone(&ran);
                let result = handle.submit(Job::new("late".to_string(), move |_: &String| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }));
                *slot.lock().unwrap() = Some(result);
                Ok(())
            }))
            .unwrap();

        let report = executor.run_all().unwrap();

        assert_eq!(report.completed, 1);
        let result = rejected.lock().unwrap().take().unwrap();
        assert!(matches!(result, Err(DropmakerError::IllegalState { .. })));
        assert_eq!(ran_late_job.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_all_is_single_use() {
        let (executor, _, _) = instrumented(1);
        assert!(executor.run_all().is_ok());
        assert!(matches!(
            executor.run_all(),
            Err(DropmakerError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_cancellation_stops_admission_but_finishes_started_jobs() {
        let token = CancelToken::new();
        let reporter = Arc::new(CountingReporter::new());
        let executor = BoundedExecutor::new(1)
            .unwrap()
            .with_reporter(reporter.clone())
            .with_cancellation(token.clone());

        let finished_first = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&finished_first);
        let cancel = token.clone();
        executor
            .submit(Job::new("first".to_string(), move |_: &String| {
                cancel.cancel();
                thread::sleep(Duration::from_millis(50));
                first.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        let tracker = Arc::new(Tracker::default());
        for index in 1..5 {
            executor.submit(tracked_job(&tracker, index, false)).unwrap();
        }

        let report = executor.run_all().unwrap();

        assert_eq!(report.started, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.abandoned, 4);
        assert!(!report.is_complete());
        assert_eq!(finished_first.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 0);
        assert_eq!(reporter.tick_count(), 1);
    }

    #[test]
    fn test_cancelled_before_start_runs_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let executor = BoundedExecutor::new(4).unwrap().with_cancellation(token);
        let tracker = Arc::new(Tracker::default());
        for index in 0..3 {
            executor.submit(tracked_job(&tracker, index, false)).unwrap();
        }

        let report = executor.run_all().unwrap();

        assert_eq!(report.started, 0);
        assert_eq!(report.abandoned, 3);
        assert_eq!(tracker.runs.load(Ordering::SeqCst), 0);
    }
}
