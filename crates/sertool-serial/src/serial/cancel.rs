//! Cancellation token shared between a worker thread and its owner.
//!
//! A token is a flag plus a condition variable. Waiters block in short
//! slices and are woken immediately by [`CancelToken::cancel`], so stop
//! latency does not depend on how long a worker intended to wait.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on one uninterrupted wait slice.
pub const WAIT_SLICE: Duration = Duration::from_millis(10);

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Clonable handle to one shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock_or_recover(lock) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_or_recover(&self.inner.0)
    }

    /// Block for up to `timeout`, returning early once cancelled.
    ///
    /// Returns `true` if the token was cancelled before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock_or_recover(lock);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            cancelled = match cvar.wait_timeout(cancelled, slice) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Lock a mutex, taking the data even if a panicking thread poisoned it.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait up to `timeout` for a worker thread to exit.
///
/// Hands the handle back if the thread is still running at the deadline.
pub(crate) fn join_within(handle: JoinHandle<()>, timeout: Duration) -> Result<(), JoinHandle<()>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        thread::sleep(JOIN_POLL);
    }
    let name = handle.thread().name().unwrap_or("worker").to_string();
    if handle.join().is_err() {
        log::error!("{} thread panicked", name);
    }
    Ok(())
}
