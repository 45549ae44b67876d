//! Per-job park/unpark slot
//!
//! A job's worker thread parks here while the job waits for a blocking
//! condition to fall, waits for the mutex to be handed back, or sleeps.
//! Every wake-up reason is a flag under one lock, so a signal that arrives
//! before the thread parks is never lost.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ParkState {
    /// Sticky: set once by cancellation, never cleared
    interrupted: bool,
    condition_fell: bool,
    mutex_granted: bool,
}

pub(crate) struct Parker {
    state: Mutex<ParkState>,
    wake: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ParkState::default()),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.wake.notify_all();
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }

    /// Reset before registering on a blocking condition
    pub(crate) fn arm_condition(&self) {
        self.state.lock().condition_fell = false;
    }

    pub(crate) fn signal_condition(&self) {
        self.state.lock().condition_fell = true;
        self.wake.notify_all();
    }

    /// Park until the condition falls or the job is interrupted
    ///
    /// Returns true if the wake-up was caused by interruption.
    pub(crate) fn park_until_condition(&self) -> bool {
        let mut state = self.state.lock();
        while !state.condition_fell && !state.interrupted {
            self.wake.wait(&mut state);
        }
        !state.condition_fell
    }

    /// Reset before offering the job back to its semaphore
    pub(crate) fn arm_mutex(&self) {
        self.state.lock().mutex_granted = false;
    }

    pub(crate) fn grant_mutex(&self) {
        self.state.lock().mutex_granted = true;
        self.wake.notify_all();
    }

    /// Park until the dispatch loop hands the mutex back
    ///
    /// Interruption does not end this wait: the job must not give up its
    /// place in the queue.
    pub(crate) fn park_until_mutex(&self) {
        let mut state = self.state.lock();
        while !state.mutex_granted {
            self.wake.wait(&mut state);
        }
    }

    /// Sleep for `duration` unless interrupted first
    ///
    /// Returns true if the full duration elapsed.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock();
        while !state.interrupted {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                return !state.interrupted;
            }
        }
        false
    }
}
