//! Shared helpers for integration tests

#![allow(dead_code)]

use modeljob::{
    Executor, Job, MutualExclusionScheduler, PoolConfig, RejectedExecution, SchedulerConfig,
    WorkerPool,
};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        pool: PoolConfig {
            core_threads: 2,
            max_threads: 64,
            thread_name_prefix: "test-model-thread".to_string(),
            ..PoolConfig::default()
        },
        default_expiration_ms: None,
    }
}

pub fn create_scheduler() -> MutualExclusionScheduler {
    init_logging();
    MutualExclusionScheduler::new(test_config())
}

/// Poll `condition` until it holds; false on timeout
pub fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

/// Execution trace shared between jobs
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().iter().any(|e| e == event)
    }
}

/// Count-down latch
#[derive(Clone)]
pub struct Latch {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new((Mutex::new(count), Condvar::new())),
        }
    }

    pub fn count_down(&self) {
        let (count, cond) = &*self.inner;
        let mut count = count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            cond.notify_all();
        }
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        let (count, cond) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut count = count.lock();
        while *count > 0 {
            if cond.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// Worker pool that refuses selected submissions (1-based)
pub struct RejectingExecutor {
    pool: WorkerPool,
    submissions: AtomicUsize,
    rejected: Mutex<HashSet<usize>>,
}

impl RejectingExecutor {
    pub fn new(rejected: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            pool: WorkerPool::new(test_config().pool),
            submissions: AtomicUsize::new(0),
            rejected: Mutex::new(rejected.iter().copied().collect()),
        })
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

impl Executor for RejectingExecutor {
    fn execute(&self, job: Job) -> Result<(), RejectedExecution> {
        let submission = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        if self.rejected.lock().contains(&submission) {
            return Err(RejectedExecution::Saturated {
                threads: 0,
                queued: 0,
            });
        }
        self.pool.execute(job)
    }

    fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }
}

pub fn create_rejecting_scheduler(rejected: &[usize]) -> (MutualExclusionScheduler, Arc<RejectingExecutor>) {
    init_logging();
    let executor = RejectingExecutor::new(rejected);
    let scheduler = MutualExclusionScheduler::with_executor(test_config(), executor.clone());
    (scheduler, executor)
}
