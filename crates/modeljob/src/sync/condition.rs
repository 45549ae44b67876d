//! Blocking conditions
//!
//! A job waiting on a blocking condition gives up its owner's mutex for the
//! duration of the wait, so other jobs of the same owner keep running. When
//! the condition falls the job competes for the mutex again with priority
//! over every job queued at the tail.

use crate::error::{JobError, JobResult};
use crate::scheduler::scheduler::SchedulerInner;
use crate::scheduler::task::ModelTask;
use crate::scheduler::JobContext;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;

struct ConditionState {
    blocking: bool,
    /// Jobs parked until the condition falls
    waiters: Vec<Arc<ModelTask>>,
}

struct ConditionInner {
    name: String,
    state: Mutex<ConditionState>,
    scheduler: Weak<SchedulerInner>,
}

/// Named boolean gate a model-thread job can wait on
///
/// Created through
/// [`MutualExclusionScheduler::create_blocking_condition`](crate::MutualExclusionScheduler::create_blocking_condition).
/// Cloning yields another handle to the same condition.
#[derive(Clone)]
pub struct BlockingCondition {
    inner: Arc<ConditionInner>,
}

impl BlockingCondition {
    pub(crate) fn new(name: impl Into<String>, blocking: bool, scheduler: Weak<SchedulerInner>) -> Self {
        Self {
            inner: Arc::new(ConditionInner {
                name: name.into(),
                state: Mutex::new(ConditionState {
                    blocking,
                    waiters: Vec::new(),
                }),
                scheduler,
            }),
        }
    }

    /// Name given at creation
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether a call to [`wait_for`](Self::wait_for) would park
    pub fn is_blocking(&self) -> bool {
        self.inner.state.lock().blocking
    }

    /// Number of jobs currently parked on this condition
    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Raise or lower the condition
    ///
    /// Lowering it wakes every parked job. Each woken job then re-acquires its
    /// owner's mutex before its `wait_for` returns.
    pub fn set_blocking(&self, blocking: bool) {
        let woken = {
            let mut state = self.inner.state.lock();
            if state.blocking == blocking {
                return;
            }
            state.blocking = blocking;
            if blocking {
                0
            } else {
                let waiters = std::mem::take(&mut state.waiters);
                for task in &waiters {
                    task.parker().signal_condition();
                }
                waiters.len()
            }
        };

        log::debug!(
            "Blocking condition '{}' set to {} ({} jobs woken)",
            self.inner.name,
            blocking,
            woken
        );
        if let Some(scheduler) = self.inner.scheduler.upgrade() {
            scheduler.notify_changed();
        }
    }

    /// Park the calling job until the condition falls
    ///
    /// Returns immediately if the condition is not blocking. Otherwise the
    /// job's mutex is passed to the next queued job of the same owner, the
    /// thread parks, and once woken the job re-acquires the mutex ahead of
    /// tail-queued jobs. The job is the model thread again whenever this
    /// returns, including when it returns an error.
    ///
    /// Returns [`JobError::Interrupted`] if the job was cancelled with
    /// interruption before or during the wait.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not the model thread of `ctx`'s job.
    pub fn wait_for(&self, ctx: &JobContext) -> JobResult<()> {
        assert!(
            ctx.is_model_thread(),
            "Wrong thread: a job can only be blocked on behalf of the model thread [thread={:?}, job={}, condition={}]",
            thread::current().name(),
            ctx.name(),
            self.inner.name
        );

        let task = ctx.task();
        let scheduler = ctx.inner();
        {
            let mut state = self.inner.state.lock();
            if !state.blocking {
                return Ok(());
            }
            task.parker().arm_condition();
            state.waiters.push(task.clone());
        }

        log::debug!("Job '{}' blocked on condition '{}'", task.name(), self.inner.name);
        scheduler.block_and_release(task);

        let interrupted = task.parker().park_until_condition();
        if interrupted {
            self.inner.state.lock().waiters.retain(|waiter| waiter.id() != task.id());
            log::debug!(
                "Job '{}' interrupted while blocked on condition '{}'",
                task.name(),
                self.inner.name
            );
        }

        scheduler.reacquire(task);

        if task.parker().is_interrupted() {
            Err(JobError::Interrupted(format!(
                "job '{}' interrupted while waiting for blocking condition '{}'",
                task.name(),
                self.inner.name
            )))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for BlockingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BlockingCondition")
            .field("name", &self.inner.name)
            .field("blocking", &state.blocking)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
