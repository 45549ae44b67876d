//! Elastic worker pool the scheduler hands jobs to
//!
//! Threads are spawned on demand up to `max_threads`. A job parked in a
//! blocking condition keeps its thread, so the pool grows instead of making
//! queued jobs wait behind parked ones. Threads above `core_threads` exit
//! after `keep_alive` without work.

use crate::config::PoolConfig;
use crate::error::RejectedExecution;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Unit of work submitted to an [`Executor`]
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on some set of threads
///
/// The scheduler never blocks on an executor: a refused job is reported
/// through [`RejectedExecution`] and the scheduler moves on.
pub trait Executor: Send + Sync {
    /// Run `job` asynchronously
    fn execute(&self, job: Job) -> Result<(), RejectedExecution>;

    /// Stop accepting jobs
    fn shutdown(&self);

    /// Whether [`shutdown`](Self::shutdown) was called
    fn is_shutdown(&self) -> bool;
}

#[derive(Debug, Default)]
struct PoolState {
    /// Threads alive (running a job or waiting for one)
    live: usize,
    /// Threads waiting for a job
    idle: usize,
    /// Jobs sent but not yet received by a thread
    queued: usize,
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    receiver: Receiver<Job>,
    next_thread_id: AtomicUsize,
}

/// Thread pool backing [`MutualExclusionScheduler`](crate::MutualExclusionScheduler)
///
/// Dropping the pool disconnects the channel; threads finish the jobs
/// already queued and exit.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    /// `None` once shut down
    sender: Mutex<Option<Sender<Job>>>,
}

impl WorkerPool {
    /// Create a pool; no thread is started before the first job
    pub fn new(mut config: PoolConfig) -> Self {
        config.max_threads = config.max_threads.max(1);
        config.core_threads = config.core_threads.min(config.max_threads);

        let (sender, receiver) = channel::unbounded();
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState::default()),
                receiver,
                next_thread_id: AtomicUsize::new(0),
            }),
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Pool configuration after clamping
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Threads currently alive
    pub fn live_threads(&self) -> usize {
        self.shared.state.lock().live
    }

    /// Threads currently waiting for a job
    pub fn idle_threads(&self) -> usize {
        self.shared.state.lock().idle
    }

    /// Jobs waiting for a thread
    pub fn queued_jobs(&self) -> usize {
        self.shared.state.lock().queued
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        let shared = self.shared.clone();
        let id = self.shared.next_thread_id.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("{}-{}", self.shared.config.thread_name_prefix, id))
            .spawn(move || Self::run_loop(id, shared))
            .map(|_| ())
    }

    /// Worker thread main loop
    fn run_loop(id: usize, shared: Arc<PoolShared>) {
        let keep_alive = shared.config.keep_alive();
        log::trace!("Worker {} started", id);

        loop {
            shared.state.lock().idle += 1;
            let received = shared.receiver.recv_timeout(keep_alive);

            let mut state = shared.state.lock();
            state.idle -= 1;
            match received {
                Ok(job) => {
                    state.queued -= 1;
                    drop(state);
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("Worker {}: job panicked", id);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if state.live > shared.config.core_threads && state.queued == 0 {
                        state.live -= 1;
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    state.live -= 1;
                    break;
                }
            }
        }

        log::trace!("Worker {} shutting down", id);
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(RejectedExecution::Shutdown)?;

        let mut state = self.shared.state.lock();
        if state.queued >= state.idle {
            // Every idle thread already has a job coming.
            if state.live < self.shared.config.max_threads {
                state.live += 1;
                if let Err(e) = self.spawn_worker() {
                    state.live -= 1;
                    log::warn!("Failed to spawn worker thread: {}", e);
                    return Err(RejectedExecution::Saturated {
                        threads: state.live,
                        queued: state.queued,
                    });
                }
            } else if state.queued - state.idle >= self.shared.config.queue_capacity {
                return Err(RejectedExecution::Saturated {
                    threads: state.live,
                    queued: state.queued,
                });
            }
        }

        sender.send(job).map_err(|_| RejectedExecution::Shutdown)?;
        state.queued += 1;
        Ok(())
    }

    fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            log::debug!("Worker pool shut down");
        }
    }

    fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
