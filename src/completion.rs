//! One-shot completion signal for handing a value from a filler thread back to a waiter.
//!
//! Cameras fill buffers on their own threads. When a transfer finishes, the
//! filling side calls [`CompletionSignal::signal`] with the buffer, and the
//! recorder, blocked in [`CompletionSignal::wait_for`], receives it. The value
//! moves through the signal, so ownership is never shared.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Condvar, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

/// The wait ended because the timeout elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimedOut;

/// A completion signal carrying one value.
///
/// The signal is re-armed each time its value is claimed, so one signal
/// serves a buffer slot for the whole session. A poisoned lock is recovered,
/// so a panicking filler never blocks the waiter.
///
/// # Example
///
/// ```
/// use std::{sync::Arc, thread, time::Duration};
/// use pvrec::completion::CompletionSignal;
///
/// let signal = Arc::new(CompletionSignal::new());
/// let filler = Arc::clone(&signal);
/// thread::spawn(move || {
///     thread::sleep(Duration::from_millis(10));
///     filler.signal(42u32).unwrap();
/// });
///
/// assert_eq!(signal.wait_for(Some(Duration::from_secs(1))), Ok(42));
/// ```
#[derive(Debug)]
pub struct CompletionSignal<T> {
    completed: AtomicBool,
    value: Mutex<Option<T>>,
    cv: Condvar,
}

impl<T> Default for CompletionSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionSignal<T> {
    /// Creates a signal in the pending state.
    pub fn new() -> Self {
        Self {
            completed: AtomicBool::new(false),
            value: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Completes the signal with `value` and wakes all waiters.
    ///
    /// # Errors
    ///
    /// Hands `value` back if the signal already holds an unclaimed value.
    pub fn signal(&self, value: T) -> Result<(), T> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(value);
        }
        *slot = Some(value);
        self.completed.store(true, Ordering::Release);
        self.cv.notify_all();
        Ok(())
    }

    /// Checks if a value is waiting to be claimed.
    ///
    /// Does not take the lock.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Claims the value without blocking.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.lock();
        let value = slot.take();
        self.completed.store(false, Ordering::Release);
        value
    }

    /// Blocks until a value is available and claims it.
    ///
    /// With `timeout == None` the wait is unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimedOut`] if the timeout elapses before completion.
    pub fn wait_for(&self, timeout: Option<Duration>) -> Result<T, WaitTimedOut> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.lock();

        loop {
            if let Some(value) = slot.take() {
                self.completed.store(false, Ordering::Release);
                return Ok(value);
            }

            slot = match deadline {
                None => self
                    .cv
                    .wait(slot)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitTimedOut);
                    }
                    match self.cv.wait_timeout(slot, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
            };
        }
    }
}
