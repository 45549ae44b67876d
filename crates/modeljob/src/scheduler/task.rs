//! Scheduler-owned job wrapper and execution state

use crate::error::{JobError, JobResult};
use crate::scheduler::scheduler::SchedulerInner;
use crate::scheduler::{JobContext, JobInput};
use crate::sync::{MutexSemaphore, OwnerId, Parker};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Unique identifier for a job
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

impl JobId {
    /// Generate a new unique JobId
    pub fn new() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a job
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Scheduled, not yet started (queued, delayed or handed to the pool)
    Pending,
    /// Executing on a worker as the owner's model thread
    Running,
    /// Parked in a blocking condition or re-acquiring the mutex afterwards
    Blocked,
    /// Body returned successfully
    Completed,
    /// Body returned an error or panicked
    Failed,
    /// Cancelled, rejected or expired
    Cancelled,
}

impl JobState {
    /// Whether the job reached a final state
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

/// Type-erased job body; the typed value travels through the future's slot
pub(crate) type Body = Box<dyn FnOnce(&JobContext) -> JobResult<()> + Send + 'static>;

/// Queue entry type of every owner semaphore
pub(crate) type TaskSemaphore = MutexSemaphore<Arc<ModelTask>>;

struct Status {
    state: JobState,
    error: Option<JobError>,
}

/// A job as seen by the scheduler
///
/// Mutated only by the scheduler and by the worker thread executing it.
pub(crate) struct ModelTask {
    id: JobId,
    name: String,
    input: JobInput,

    status: Mutex<Status>,
    finished: Condvar,

    body: Mutex<Option<Body>>,

    /// Interrupt hook and wake-up slot for blocking waits
    parker: Parker,

    /// Set while the task owns its semaphore and executes as model thread
    holds_mutex: AtomicBool,
    executing_thread: Mutex<Option<ThreadId>>,

    /// Set while the task waits to get the mutex back after a blocking condition
    reacquiring: AtomicBool,

    /// When the task entered its semaphore queue (expiration base)
    queued_at: Mutex<Option<Instant>>,

    /// Semaphore of the owner, refreshed from the registry whenever the task
    /// offers itself, since an idle owner's semaphore may have been evicted
    semaphore: Mutex<Arc<TaskSemaphore>>,
    scheduler: Weak<SchedulerInner>,
}

impl ModelTask {
    pub(crate) fn new(
        input: JobInput,
        body: Body,
        semaphore: Arc<TaskSemaphore>,
        scheduler: Weak<SchedulerInner>,
    ) -> Self {
        let id = JobId::new();
        let name = input
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("job-{}", id.as_u64()));
        Self {
            id,
            name,
            input,
            status: Mutex::new(Status {
                state: JobState::Pending,
                error: None,
            }),
            finished: Condvar::new(),
            body: Mutex::new(Some(body)),
            parker: Parker::new(),
            holds_mutex: AtomicBool::new(false),
            executing_thread: Mutex::new(None),
            reacquiring: AtomicBool::new(false),
            queued_at: Mutex::new(None),
            semaphore: Mutex::new(semaphore),
            scheduler,
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn owner(&self) -> OwnerId {
        self.input.owner()
    }

    pub(crate) fn semaphore(&self) -> Arc<TaskSemaphore> {
        self.semaphore.lock().clone()
    }

    pub(crate) fn attach(&self, semaphore: Arc<TaskSemaphore>) {
        *self.semaphore.lock() = semaphore;
    }

    pub(crate) fn parker(&self) -> &Parker {
        &self.parker
    }

    pub(crate) fn state(&self) -> JobState {
        self.status.lock().state
    }

    pub(crate) fn error(&self) -> Option<JobError> {
        self.status.lock().error.clone()
    }

    pub(crate) fn take_body(&self) -> Option<Body> {
        self.body.lock().take()
    }

    pub(crate) fn mark_queued(&self) {
        *self.queued_at.lock() = Some(Instant::now());
    }

    /// Whether the expiration deadline passed while the task sat in the queue
    pub(crate) fn is_expired(&self) -> bool {
        match (self.input.expiration(), *self.queued_at.lock()) {
            (Some(expiration), Some(queued_at)) => queued_at.elapsed() > expiration,
            _ => false,
        }
    }

    /// Pending → Running; false if the task was cancelled in the meantime
    pub(crate) fn begin(&self) -> bool {
        let mut status = self.status.lock();
        if status.state == JobState::Pending {
            status.state = JobState::Running;
            true
        } else {
            false
        }
    }

    pub(crate) fn block(&self) {
        let mut status = self.status.lock();
        if status.state == JobState::Running {
            status.state = JobState::Blocked;
        }
    }

    pub(crate) fn resume(&self) {
        let mut status = self.status.lock();
        if status.state == JobState::Blocked {
            status.state = JobState::Running;
        }
    }

    /// Record the body's outcome unless the task was cancelled meanwhile
    pub(crate) fn complete(&self, result: JobResult<()>) -> JobState {
        let mut status = self.status.lock();
        if matches!(status.state, JobState::Running | JobState::Blocked) {
            match result {
                Ok(()) => status.state = JobState::Completed,
                Err(e) => {
                    status.state = JobState::Failed;
                    status.error = Some(e);
                }
            }
        }
        self.finished.notify_all();
        status.state
    }

    /// Cancel the task
    ///
    /// A pending waiter is removed from its queue. The check of the state and
    /// the removal happen under the status lock, which the worker also takes
    /// in [`begin`](Self::begin), so a task is either removed or entered,
    /// never both. A running or blocked task keeps its place in the mutex
    /// hand-off order and is only interrupted.
    pub(crate) fn cancel(self: &Arc<Self>, interrupt: bool, cause: JobError) -> bool {
        let (was_pending, removed) = {
            let mut status = self.status.lock();
            let outcome = match status.state {
                JobState::Completed | JobState::Failed | JobState::Cancelled => return false,
                JobState::Pending => (true, self.semaphore().remove(self)),
                JobState::Running | JobState::Blocked => {
                    if interrupt {
                        self.parker.interrupt();
                    }
                    (false, false)
                }
            };
            status.state = JobState::Cancelled;
            status.error = Some(cause);
            self.finished.notify_all();
            outcome
        };

        // A cancelled pending task never enters its body; release captured state now.
        if was_pending {
            drop(self.take_body());
        }

        log::debug!("Job '{}' cancelled (removed from queue: {})", self.name, removed);
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.on_cancelled(self);
        }
        true
    }

    /// Block until the task reached a final state
    pub(crate) fn wait_finished(&self, timeout: Duration) -> Option<JobState> {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock();
        while !status.state.is_terminal() {
            if self.finished.wait_until(&mut status, deadline).timed_out() {
                break;
            }
        }
        status.state.is_terminal().then_some(status.state)
    }

    pub(crate) fn holds_mutex(&self) -> bool {
        self.holds_mutex.load(Ordering::Acquire)
    }

    /// Bind the task to the calling worker thread as its owner's model thread
    pub(crate) fn enter_model_thread(&self) {
        *self.executing_thread.lock() = Some(thread::current().id());
        self.holds_mutex.store(true, Ordering::Release);
    }

    pub(crate) fn leave_model_thread(&self) {
        self.holds_mutex.store(false, Ordering::Release);
        *self.executing_thread.lock() = None;
    }

    /// Whether the calling thread currently executes this task as model thread
    pub(crate) fn is_current_model_thread(&self) -> bool {
        self.holds_mutex() && *self.executing_thread.lock() == Some(thread::current().id())
    }

    pub(crate) fn set_reacquiring(&self, value: bool) {
        self.reacquiring.store(value, Ordering::Release);
    }

    /// Consume the re-acquisition marker
    pub(crate) fn take_reacquiring(&self) -> bool {
        self.reacquiring.swap(false, Ordering::AcqRel)
    }
}

impl PartialEq for ModelTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ModelTask {}

impl fmt::Debug for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner())
            .field("state", &self.state())
            .finish()
    }
}
