//! Counting permit pool bounding the number of jobs in flight

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Semaphore built on a bounded channel pre-filled with one token per permit.
///
/// Acquiring receives a token, dropping the [`Permit`] sends it back, so a
/// permit is returned on every exit path of the worker that holds it.
pub struct PermitPool {
    tokens: Receiver<()>,
    returns: Sender<()>,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

/// RAII guard for one slot of the pool
pub struct Permit<'a> {
    pool: &'a PermitPool,
}

/// Outcome of a bounded wait for a permit
pub enum Acquire<'a> {
    Granted(Permit<'a>),
    TimedOut,
}

impl PermitPool {
    pub fn new(capacity: usize) -> Self {
        let (returns, tokens) = channel::bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel holds exactly `capacity` tokens.
            let _ = returns.send(());
        }

        Self {
            tokens,
            returns,
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at once since creation
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Take a permit without waiting
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        match self.tokens.try_recv() {
            Ok(()) => Some(self.grant()),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Block until a permit is free
    pub fn acquire(&self) -> Permit<'_> {
        loop {
            // The pool owns a sender, so the channel never disconnects.
            if self.tokens.recv().is_ok() {
                return self.grant();
            }
        }
    }

    /// Wait at most `timeout` for a permit
    pub fn acquire_timeout(&self, timeout: Duration) -> Acquire<'_> {
        match self.tokens.recv_timeout(timeout) {
            Ok(()) => Acquire::Granted(self.grant()),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Acquire::TimedOut,
        }
    }

    fn grant(&self) -> Permit<'_> {
        let held = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(held, Ordering::SeqCst);
        Permit { pool: self }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
        let _ = self.pool.returns.send(());
    }
}
