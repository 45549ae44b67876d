//! Handles to scheduled jobs

use crate::error::{JobError, JobResult};
use crate::scheduler::task::ModelTask;
use crate::scheduler::{JobId, JobState};
use crate::sync::OwnerId;
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Untyped handle to a scheduled job
///
/// Used for cancellation, state queries and filtering. Two handles are equal
/// if they refer to the same job.
#[derive(Clone)]
pub struct FutureHandle {
    task: Arc<ModelTask>,
}

impl FutureHandle {
    pub(crate) fn new(task: Arc<ModelTask>) -> Self {
        Self { task }
    }

    /// Job identifier
    pub fn id(&self) -> JobId {
        self.task.id()
    }

    /// Job name
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Owner the job runs under
    pub fn owner(&self) -> OwnerId {
        self.task.owner()
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.task.state()
    }

    /// Whether the job reached a final state
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether the job was cancelled, rejected or expired
    pub fn is_cancelled(&self) -> bool {
        self.state() == JobState::Cancelled
    }

    /// Cancel the job
    ///
    /// A queued job is removed and never runs. A running or blocked job is
    /// interrupted if `interrupt` is set, and keeps the mutex until its body
    /// returns. Returns false if the job had already finished.
    pub fn cancel(&self, interrupt: bool) -> bool {
        self.task
            .cancel(interrupt, JobError::Cancelled(self.task.name().to_string()))
    }

    /// Wait for the job to finish, discarding its value
    pub fn wait(&self, timeout: Duration) -> JobResult<()> {
        match self.task.wait_finished(timeout) {
            None => Err(JobError::Timeout(self.task.name().to_string())),
            Some(JobState::Completed) => Ok(()),
            Some(_) => Err(self.failure()),
        }
    }

    fn failure(&self) -> JobError {
        self.task
            .error()
            .unwrap_or_else(|| JobError::Cancelled(self.task.name().to_string()))
    }
}

impl PartialEq for FutureHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for FutureHandle {}

impl Hash for FutureHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for FutureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.task, f)
    }
}

/// Typed handle returned when scheduling a job
pub struct JobFuture<T> {
    handle: FutureHandle,
    value: Arc<Mutex<Option<T>>>,
}

impl<T> JobFuture<T> {
    pub(crate) fn new(task: Arc<ModelTask>, value: Arc<Mutex<Option<T>>>) -> Self {
        Self {
            handle: FutureHandle::new(task),
            value,
        }
    }

    /// Untyped handle to the same job
    pub fn handle(&self) -> &FutureHandle {
        &self.handle
    }

    /// Job identifier
    pub fn id(&self) -> JobId {
        self.handle.id()
    }

    /// Job name
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Owner the job runs under
    pub fn owner(&self) -> OwnerId {
        self.handle.owner()
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.handle.state()
    }

    /// Whether the job reached a final state
    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// Whether the job was cancelled, rejected or expired
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// See [`FutureHandle::cancel`]
    pub fn cancel(&self, interrupt: bool) -> bool {
        self.handle.cancel(interrupt)
    }

    /// Block until the job finished and return its value
    ///
    /// Returns [`JobError::Timeout`] if the job is not done after `timeout`;
    /// the job itself is not affected. A cancelled job yields
    /// [`JobError::Cancelled`] or [`JobError::Rejected`], a failed one the
    /// error its body returned.
    pub fn get(&self, timeout: Duration) -> JobResult<T>
    where
        T: Clone,
    {
        self.handle.wait(timeout)?;
        self.value
            .lock()
            .clone()
            .ok_or_else(|| JobError::Cancelled(self.handle.name().to_string()))
    }
}

impl<T> Clone for JobFuture<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T> fmt::Debug for JobFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobFuture").field(&self.handle).finish()
    }
}

impl<T> From<&JobFuture<T>> for FutureHandle {
    fn from(future: &JobFuture<T>) -> Self {
        future.handle.clone()
    }
}
