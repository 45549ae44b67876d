//! Owner-scoped mutex semaphore
//!
//! The queue doubles as the permit count: its head is the mutex owner and
//! every other entry is a waiter. There is no separate counter that could
//! drift from the queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Mutual-exclusion semaphore with FIFO tail and priority head insertion
///
/// Items are opaque identities; the semaphore never looks inside them.
/// Dispatching the item returned by [`release_and_poll`](Self::release_and_poll)
/// is the caller's job.
pub struct MutexSemaphore<T> {
    /// Owner at the front, waiters behind it
    queue: Mutex<VecDeque<T>>,

    /// Mirrors `queue.is_empty()`; only changed while `queue` is locked
    idle: Mutex<bool>,

    /// Signalled whenever `idle` flips to true
    idle_changed: Condvar,
}

impl<T: Clone + PartialEq> MutexSemaphore<T> {
    /// Create an idle semaphore
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            idle: Mutex::new(true),
            idle_changed: Condvar::new(),
        }
    }

    /// Acquire the mutex if free, else enqueue `item` behind every waiter
    ///
    /// Returns true if `item` became the owner.
    pub fn try_acquire_else_offer_tail(&self, item: T) -> bool {
        let mut queue = self.queue.lock();
        let acquired = queue.is_empty();
        queue.push_back(item);
        if acquired {
            self.set_idle(false);
        }
        acquired
    }

    /// Acquire the mutex if free, else enqueue `item` right after the owner
    ///
    /// Returns true if `item` became the owner.
    pub fn try_acquire_else_offer_head(&self, item: T) -> bool {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            queue.push_back(item);
            self.set_idle(false);
            true
        } else {
            queue.insert(1, item);
            false
        }
    }

    /// Drop the current owner and return the next one, if any
    ///
    /// When the queue runs empty the semaphore becomes idle and every
    /// [`wait_for_idle`](Self::wait_for_idle) caller is woken.
    pub fn release_and_poll(&self) -> Option<T> {
        let mut queue = self.queue.lock();
        queue.pop_front();
        match queue.front() {
            Some(next) => Some(next.clone()),
            None => {
                self.set_idle(true);
                None
            }
        }
    }

    /// Number of permits handed out (owner plus waiters)
    pub fn permit_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nobody owns the mutex
    pub fn is_idle(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Current mutex owner
    pub fn mutex_owner(&self) -> Option<T> {
        self.queue.lock().front().cloned()
    }

    /// Whether `item` owns the mutex
    pub fn is_owner(&self, item: &T) -> bool {
        self.queue.lock().front() == Some(item)
    }

    /// Whether `item` is queued (as owner or waiter)
    pub fn contains(&self, item: &T) -> bool {
        self.queue.lock().contains(item)
    }

    /// Remove `item` if it is waiting
    ///
    /// The owner is never removed: its release path must stay intact.
    /// Returns true if `item` was found behind the owner and removed.
    pub fn remove(&self, item: &T) -> bool {
        let mut queue = self.queue.lock();
        match queue.iter().skip(1).position(|queued| queued == item) {
            Some(index) => {
                queue.remove(index + 1);
                true
            }
            None => false,
        }
    }

    /// Discard every waiter, keeping the owner
    ///
    /// `cancel` is invoked for each discarded waiter after the lock is released.
    pub fn clear_and_cancel<F>(&self, mut cancel: F)
    where
        F: FnMut(T),
    {
        let discarded: Vec<T> = {
            let mut queue = self.queue.lock();
            if queue.len() <= 1 {
                return;
            }
            queue.drain(1..).collect()
        };

        for item in discarded {
            cancel(item);
        }
    }

    /// Visit queued items in queue order, owner first
    ///
    /// The visitor runs on a snapshot taken under the lock and stops the
    /// iteration by returning false.
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(&T) -> bool,
    {
        for item in self.snapshot() {
            if !visitor(&item) {
                return;
            }
        }
    }

    /// Consistent copy of the queue, owner first
    pub fn snapshot(&self) -> Vec<T> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Block the calling thread until the semaphore is idle
    ///
    /// Returns false if `timeout` elapsed first. Must not be called from a
    /// thread that owns this mutex.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut idle = self.idle.lock();
        while !*idle {
            if self.idle_changed.wait_until(&mut idle, deadline).timed_out() {
                return *idle;
            }
        }
        true
    }

    /// Called with `queue` locked so the flag never disagrees with the queue
    fn set_idle(&self, value: bool) {
        let mut idle = self.idle.lock();
        *idle = value;
        if value {
            self.idle_changed.notify_all();
        }
    }
}

impl<T: Clone + PartialEq> Default for MutexSemaphore<T> {
    fn default() -> Self {
        Self::new()
    }
}
