//! Execution context handed to every job body

use crate::error::{JobError, JobResult};
use crate::scheduler::scheduler::SchedulerInner;
use crate::scheduler::task::ModelTask;
use crate::scheduler::{FutureHandle, MutualExclusionScheduler};
use crate::sync::OwnerId;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Context of the job currently executing
///
/// Identifies the running job, answers whether the calling thread is the
/// model thread, and gives access to the scheduler for nested work.
pub struct JobContext {
    inner: Arc<SchedulerInner>,
    task: Arc<ModelTask>,
}

impl JobContext {
    pub(crate) fn new(inner: Arc<SchedulerInner>, task: Arc<ModelTask>) -> Self {
        Self { inner, task }
    }

    pub(crate) fn task(&self) -> &Arc<ModelTask> {
        &self.task
    }

    pub(crate) fn inner(&self) -> &Arc<SchedulerInner> {
        &self.inner
    }

    /// Handle of the running job
    pub fn future(&self) -> FutureHandle {
        FutureHandle::new(self.task.clone())
    }

    /// Owner the job runs under
    pub fn owner(&self) -> OwnerId {
        self.task.owner()
    }

    /// Name of the running job
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Scheduler that runs this job
    pub fn scheduler(&self) -> MutualExclusionScheduler {
        MutualExclusionScheduler::from_inner(self.inner.clone())
    }

    /// Whether the calling thread holds this job's mutex
    ///
    /// False on any other thread, and false while the job is parked in a
    /// blocking condition.
    pub fn is_model_thread(&self) -> bool {
        self.task.is_current_model_thread()
    }

    /// Run `work` synchronously as part of the current job
    ///
    /// `work` runs on the calling thread without any mutex hand-off and its
    /// result is returned directly.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not the model thread.
    pub fn run_now<T, F>(&self, work: F) -> JobResult<T>
    where
        F: FnOnce(&JobContext) -> JobResult<T>,
    {
        assert!(
            self.is_model_thread(),
            "Wrong thread: the calling thread must be the model thread to run jobs in 'run_now' style [thread={:?}, job={}]",
            thread::current().name(),
            self.task.name()
        );
        work(self)
    }

    /// Whether the job was cancelled with interruption
    pub fn is_interrupted(&self) -> bool {
        self.task.parker().is_interrupted()
    }

    /// Return [`JobError::Interrupted`] if the job was interrupted
    pub fn check_interrupted(&self) -> JobResult<()> {
        if self.is_interrupted() {
            Err(self.interrupted_error())
        } else {
            Ok(())
        }
    }

    /// Sleep while keeping the mutex; wakes early on interruption
    pub fn sleep(&self, duration: Duration) -> JobResult<()> {
        if self.task.parker().sleep(duration) {
            Ok(())
        } else {
            Err(self.interrupted_error())
        }
    }

    fn interrupted_error(&self) -> JobError {
        JobError::Interrupted(format!("job '{}' was interrupted", self.task.name()))
    }
}
