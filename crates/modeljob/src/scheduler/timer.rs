//! Timer thread for delayed scheduling
//!
//! Instead of parking a worker per delayed job, one timer thread waits for
//! the next deadline using condvar timeouts and runs the due actions.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

type Action = Box<dyn FnOnce() + Send + 'static>;

/// Entry in the timer heap
struct TimerEntry {
    /// When to run the action
    due_at: Instant,
    /// Insertion order, so equal deadlines fire FIFO
    seq: u64,
    action: Action,
}

// Reverse ordering for min-heap (earliest deadline first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

#[derive(Default)]
struct TimerState {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

/// Runs actions at a deadline on a dedicated thread
///
/// The thread is started by the first [`schedule`](Self::schedule) call.
pub struct DelayTimer {
    state: Mutex<TimerState>,
    /// Wakes the timer thread when an entry is added or on shutdown
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DelayTimer {
    /// Create a stopped timer
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState::default()),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Run `action` on the timer thread once `due_at` passed
    ///
    /// Returns false (dropping `action`) if the timer was stopped or its
    /// thread could not be started.
    pub fn schedule<F>(self: &Arc<Self>, due_at: Instant, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown.load(AtomicOrdering::Acquire) || !self.ensure_started() {
            return false;
        }

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(TimerEntry {
            due_at,
            seq,
            action: Box::new(action),
        });
        // The new entry may be due earlier than the one being waited for.
        self.notify.notify_one();
        true
    }

    /// Number of actions not yet run
    pub fn pending_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Stop the timer thread, dropping every pending action
    pub fn stop(&self) {
        self.shutdown.store(true, AtomicOrdering::Release);
        let dropped = {
            let mut state = self.state.lock();
            self.notify.notify_one();
            std::mem::take(&mut state.entries)
        };
        drop(dropped);

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn ensure_started(self: &Arc<Self>) -> bool {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return true;
        }

        let timer = Arc::downgrade(self);
        match thread::Builder::new()
            .name("modeljob-timer".to_string())
            .spawn(move || {
                if let Some(timer) = timer.upgrade() {
                    timer.run_loop();
                }
            }) {
            Ok(spawned) => {
                *handle = Some(spawned);
                true
            }
            Err(e) => {
                log::error!("Failed to spawn timer thread: {}", e);
                false
            }
        }
    }

    /// Timer thread main loop
    fn run_loop(&self) {
        loop {
            let mut state = self.state.lock();

            // Checked under the lock so a stop() between two iterations is not missed.
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let now = Instant::now();
            if state.entries.peek().map_or(false, |entry| entry.due_at <= now) {
                if let Some(entry) = state.entries.pop() {
                    drop(state);
                    (entry.action)();
                }
                continue;
            }

            match state.entries.peek().map(|entry| entry.due_at) {
                Some(due_at) => {
                    self.notify.wait_until(&mut state, due_at);
                }
                None => self.notify.wait(&mut state),
            }
        }

        log::trace!("Timer thread shutting down");
    }
}

impl Drop for DelayTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
