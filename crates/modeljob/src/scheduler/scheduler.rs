//! Mutual-exclusion scheduler coordinating owners, semaphores and the pool

use crate::config::SchedulerConfig;
use crate::error::{JobError, JobResult, RejectedExecution};
use crate::scheduler::filter::FutureFilter;
use crate::scheduler::task::{Body, ModelTask, TaskSemaphore};
use crate::scheduler::{
    DelayTimer, Executor, FutureHandle, JobContext, JobFuture, JobId, JobInput, JobState,
    WorkerPool,
};
use crate::sync::{BlockingCondition, OwnerId, SemaphoreRegistry};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Total jobs scheduled
    pub jobs_scheduled: u64,

    /// Jobs whose body returned successfully
    pub jobs_completed: u64,

    /// Jobs whose body returned an error or panicked
    pub jobs_failed: u64,

    /// Jobs cancelled, including rejected and expired ones
    pub jobs_cancelled: u64,

    /// Jobs refused by the executor
    pub jobs_rejected: u64,

    /// Owners with a semaphore
    pub owners: usize,

    /// Permits held across owners (owners plus waiters)
    pub permits: usize,

    /// Jobs parked in a blocking condition
    pub blocked_jobs: usize,

    /// Jobs waiting for their delay to elapse
    pub delayed_jobs: usize,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

/// State shared by scheduler handles, job contexts and blocking conditions
pub(crate) struct SchedulerInner {
    config: SchedulerConfig,

    /// Runs jobs; owned by the scheduler instance, never process-global
    executor: Arc<dyn Executor>,

    semaphores: SemaphoreRegistry<Arc<ModelTask>>,

    /// Jobs parked in a blocking condition
    blocked: DashMap<JobId, Arc<ModelTask>>,

    /// Jobs waiting for their delay to elapse
    delayed: DashMap<JobId, Arc<ModelTask>>,

    /// Held for writing while a job moves between the delayed set, the
    /// blocked set and a semaphore queue, so a snapshot never misses it
    membership: RwLock<()>,

    /// Worker threads currently executing as model thread
    model_threads: Mutex<HashSet<ThreadId>>,

    /// Bumped on every change that can affect `is_done`
    generation: Mutex<u64>,
    changed: Condvar,

    timer: Arc<DelayTimer>,
    shut_down: AtomicBool,
    counters: Counters,
}

impl SchedulerInner {
    fn create_task<T, F>(self: &Arc<Self>, input: JobInput, work: F) -> (Arc<ModelTask>, JobFuture<T>)
    where
        T: Send + 'static,
        F: FnOnce(&JobContext) -> JobResult<T> + Send + 'static,
    {
        let input = input.or_expire_after(self.config.default_expiration());
        let value = Arc::new(Mutex::new(None));
        let slot = value.clone();
        let body: Body = Box::new(move |ctx: &JobContext| {
            let result = work(ctx)?;
            *slot.lock() = Some(result);
            Ok(())
        });

        // Replaced by the registered semaphore once the task is enqueued.
        let semaphore = self
            .semaphores
            .get(input.owner())
            .unwrap_or_else(|| Arc::new(TaskSemaphore::new()));
        let task = Arc::new(ModelTask::new(input, body, semaphore, Arc::downgrade(self)));
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        (task.clone(), JobFuture::new(task, value))
    }

    /// Acquire the owner's mutex or queue behind it
    fn enqueue(self: &Arc<Self>, task: &Arc<ModelTask>) {
        if self.shut_down.load(Ordering::Acquire) {
            self.reject(task, &RejectedExecution::Shutdown);
            return;
        }

        let (semaphore, acquired) = {
            let _membership = self.membership.write();
            let semaphore = self.semaphores.get_or_create(task.owner());
            task.attach(semaphore.clone());
            task.mark_queued();
            let acquired = semaphore.try_acquire_else_offer_tail(task.clone());
            self.delayed.remove(&task.id());
            (semaphore, acquired)
        };

        if acquired {
            log::trace!("Job '{}' acquired the mutex of {}", task.name(), task.owner());
            if let Err(rejection) = self.submit(task) {
                self.reject(task, &rejection);
                self.release(task.owner(), &semaphore);
            }
        } else {
            log::trace!(
                "Job '{}' queued behind {} permits of {}",
                task.name(),
                semaphore.permit_count().saturating_sub(1),
                task.owner()
            );
        }
        self.notify_changed();
    }

    fn enqueue_delayed(self: &Arc<Self>, task: Arc<ModelTask>, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(&task);
            return;
        }

        self.delayed.insert(task.id(), task.clone());
        let scheduler = Arc::downgrade(self);
        let fired = task.clone();
        let accepted = !self.shut_down.load(Ordering::Acquire)
            && self.timer.schedule(Instant::now() + delay, move || {
                if let Some(scheduler) = scheduler.upgrade() {
                    if fired.state() == JobState::Pending {
                        scheduler.enqueue(&fired);
                    } else {
                        scheduler.delayed.remove(&fired.id());
                        scheduler.notify_changed();
                    }
                }
            });

        if !accepted {
            self.delayed.remove(&task.id());
            self.reject(&task, &RejectedExecution::Shutdown);
        }
    }

    fn submit(self: &Arc<Self>, task: &Arc<ModelTask>) -> Result<(), RejectedExecution> {
        let scheduler = self.clone();
        let task = task.clone();
        self.executor
            .execute(Box::new(move || scheduler.run_task(task)))
    }

    fn reject(&self, task: &Arc<ModelTask>, rejection: &RejectedExecution) {
        if self.executor.is_shutdown() || self.shut_down.load(Ordering::Acquire) {
            log::debug!("Job '{}' rejected: {}", task.name(), rejection);
        } else {
            log::error!("Job '{}' rejected: {}", task.name(), rejection);
        }
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        task.cancel(true, JobError::Rejected(task.name().to_string()));
    }

    /// Hand the mutex to `next`, skipping every job the executor rejects
    ///
    /// Returns true if the semaphore ran idle.
    fn dispatch(self: &Arc<Self>, mut next: Option<Arc<ModelTask>>, semaphore: &TaskSemaphore) -> bool {
        while let Some(task) = next {
            if task.take_reacquiring() {
                log::trace!("Handing the mutex back to job '{}'", task.name());
                task.parker().grant_mutex();
                return false;
            }
            match self.submit(&task) {
                Ok(()) => return false,
                Err(rejection) => {
                    self.reject(&task, &rejection);
                    next = semaphore.release_and_poll();
                }
            }
        }
        true
    }

    /// Pass the mutex on and forget the owner if nobody is left queued
    fn release(self: &Arc<Self>, owner: OwnerId, semaphore: &TaskSemaphore) {
        let next = semaphore.release_and_poll();
        if self.dispatch(next, semaphore) {
            self.evict_idle(owner);
        }
    }

    /// Drop the registry entry of `owner` if its semaphore is idle
    ///
    /// Runs under the membership lock, which every offer also holds between
    /// looking the semaphore up and queueing on it, so no job can end up on
    /// an evicted semaphore.
    fn evict_idle(&self, owner: OwnerId) {
        let _membership = self.membership.write();
        if self.semaphores.remove_if_idle(owner) {
            log::trace!("Released the semaphore of idle {}", owner);
        }
    }

    /// Worker-side execution of one job
    fn run_task(self: &Arc<Self>, task: Arc<ModelTask>) {
        if task.state() == JobState::Pending && task.is_expired() {
            log::debug!("Job '{}' expired before its first execution", task.name());
            task.cancel(false, JobError::Cancelled(task.name().to_string()));
        }

        if !task.begin() {
            log::trace!("Skipping cancelled job '{}'", task.name());
            self.release(task.owner(), &task.semaphore());
            self.notify_changed();
            return;
        }

        self.enter_model_thread(&task);
        let ctx = JobContext::new(self.clone(), task.clone());
        let result = match task.take_body() {
            Some(body) => panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)))
                .unwrap_or_else(|payload| Err(JobError::failed(task.name(), panic_message(&*payload)))),
            None => Ok(()),
        };
        drop(ctx);

        match task.complete(result) {
            JobState::Completed => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            JobState::Failed => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if let Some(error) = task.error() {
                    log::warn!("{}", error);
                }
            }
            _ => {}
        }

        if task.holds_mutex() {
            self.pass_mutex(&task);
        } else {
            log::error!(
                "Job '{}' finished without holding the mutex of {}",
                task.name(),
                task.owner()
            );
        }
    }

    fn enter_model_thread(&self, task: &ModelTask) {
        task.enter_model_thread();
        self.model_threads.lock().insert(thread::current().id());
    }

    fn leave_model_thread(&self, task: &ModelTask) {
        task.leave_model_thread();
        self.model_threads.lock().remove(&thread::current().id());
    }

    /// Release the mutex of a finished job and dispatch the next one
    pub(crate) fn pass_mutex(self: &Arc<Self>, task: &Arc<ModelTask>) {
        self.leave_model_thread(task);
        self.release(task.owner(), &task.semaphore());
        self.notify_changed();
    }

    /// Park `task` in the blocked set and release its mutex
    pub(crate) fn block_and_release(self: &Arc<Self>, task: &Arc<ModelTask>) {
        let semaphore = task.semaphore();
        let next = {
            let _membership = self.membership.write();
            self.blocked.insert(task.id(), task.clone());
            task.block();
            self.leave_model_thread(task);
            semaphore.release_and_poll()
        };
        if self.dispatch(next, &semaphore) {
            self.evict_idle(task.owner());
        }
        self.notify_changed();
    }

    /// Compete for the mutex again with head priority and wait until owner
    ///
    /// Interruption does not shorten this wait and expiration does not apply.
    pub(crate) fn reacquire(self: &Arc<Self>, task: &Arc<ModelTask>) {
        task.parker().arm_mutex();
        task.set_reacquiring(true);
        let acquired = {
            let _membership = self.membership.write();
            let semaphore = self.semaphores.get_or_create(task.owner());
            task.attach(semaphore.clone());
            let acquired = semaphore.try_acquire_else_offer_head(task.clone());
            self.blocked.remove(&task.id());
            acquired
        };
        self.notify_changed();

        if acquired {
            task.set_reacquiring(false);
        } else {
            log::trace!("Job '{}' waiting to re-acquire the mutex", task.name());
            task.parker().park_until_mutex();
        }

        self.enter_model_thread(task);
        task.resume();
        log::debug!("Job '{}' re-acquired the mutex of {}", task.name(), task.owner());
    }

    pub(crate) fn on_cancelled(&self, task: &ModelTask) {
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        self.delayed.remove(&task.id());
        self.notify_changed();
    }

    pub(crate) fn notify_changed(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Every job that is queued, parked or delayed
    fn futures(&self) -> Vec<Arc<ModelTask>> {
        let _membership = self.membership.read();
        let mut seen = HashSet::new();
        let mut futures = Vec::new();

        for semaphore in self.semaphores.semaphores() {
            for task in semaphore.snapshot() {
                if seen.insert(task.id()) {
                    futures.push(task);
                }
            }
        }
        for entry in self.blocked.iter().chain(self.delayed.iter()) {
            if seen.insert(*entry.key()) {
                futures.push(entry.value().clone());
            }
        }
        futures
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.timer.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}

/// Single-owner mutual-exclusion job scheduler
///
/// Jobs of one [`OwnerId`] run one at a time, in submission order, on a
/// shared [`Executor`]. Jobs of different owners run in parallel. Cloning
/// yields another handle to the same scheduler.
#[derive(Clone)]
pub struct MutualExclusionScheduler {
    inner: Arc<SchedulerInner>,
}

impl MutualExclusionScheduler {
    /// Create a scheduler backed by its own [`WorkerPool`]
    pub fn new(config: SchedulerConfig) -> Self {
        let pool = Arc::new(WorkerPool::new(config.pool.clone()));
        Self::with_executor(config, pool)
    }

    /// Create a scheduler running jobs on `executor`
    pub fn with_executor(config: SchedulerConfig, executor: Arc<dyn Executor>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                executor,
                semaphores: SemaphoreRegistry::new(),
                blocked: DashMap::new(),
                delayed: DashMap::new(),
                membership: RwLock::new(()),
                model_threads: Mutex::new(HashSet::new()),
                generation: Mutex::new(0),
                changed: Condvar::new(),
                timer: DelayTimer::new(),
                shut_down: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SchedulerInner>) -> Self {
        Self { inner }
    }

    /// Configuration the scheduler was created with
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Schedule `work` for the owner named in `input`
    ///
    /// If the owner's mutex is free the job is handed to the executor right
    /// away, otherwise it waits behind every job already queued for that
    /// owner. The returned future is the only place failures surface.
    pub fn schedule<T, F>(&self, input: impl Into<JobInput>, work: F) -> JobFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobContext) -> JobResult<T> + Send + 'static,
    {
        let (task, future) = self.inner.create_task(input.into(), work);
        self.inner.enqueue(&task);
        future
    }

    /// Schedule `work` once `delay` elapsed
    ///
    /// The job enters its owner's queue when the delay is over; its
    /// expiration is measured from that moment.
    pub fn schedule_delayed<T, F>(&self, input: impl Into<JobInput>, delay: Duration, work: F) -> JobFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobContext) -> JobResult<T> + Send + 'static,
    {
        let (task, future) = self.inner.create_task(input.into(), work);
        self.inner.enqueue_delayed(task, delay);
        future
    }

    /// Run `work` synchronously as part of the job executing `ctx`
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is not the model thread of `ctx`.
    pub fn run_now<T, F>(&self, ctx: &JobContext, work: F) -> JobResult<T>
    where
        F: FnOnce(&JobContext) -> JobResult<T>,
    {
        ctx.run_now(work)
    }

    /// Create a blocking condition bound to this scheduler
    pub fn create_blocking_condition(&self, name: impl Into<String>, blocking: bool) -> BlockingCondition {
        BlockingCondition::new(name, blocking, Arc::downgrade(&self.inner))
    }

    /// Whether the calling thread executes a job as its owner's model thread
    pub fn is_model_thread(&self) -> bool {
        self.inner
            .model_threads
            .lock()
            .contains(&thread::current().id())
    }

    /// Whether `future` is parked in a blocking condition
    pub fn is_blocked(&self, future: &FutureHandle) -> bool {
        self.inner.blocked.contains_key(&future.id())
    }

    /// Whether no queued, parked or delayed job matches `filter`
    pub fn is_done<F>(&self, filter: &F) -> bool
    where
        F: FutureFilter + ?Sized,
    {
        !self
            .inner
            .futures()
            .into_iter()
            .any(|task| filter.accept(&FutureHandle::new(task)))
    }

    /// Block until [`is_done`](Self::is_done) holds for `filter`
    ///
    /// Returns false if `timeout` elapsed first. Waiting from a model thread
    /// for jobs of its own owner can only time out.
    pub fn wait_until_done<F>(&self, filter: &F, timeout: Duration) -> bool
    where
        F: FutureFilter + ?Sized,
    {
        let deadline = Instant::now() + timeout;
        let mut generation = self.inner.generation.lock();
        loop {
            if self.is_done(filter) {
                return true;
            }
            if self
                .inner
                .changed
                .wait_until(&mut generation, deadline)
                .timed_out()
            {
                return self.is_done(filter);
            }
        }
    }

    /// Visit every unfinished job matching `filter`
    ///
    /// Queued jobs come in queue order per owner, followed by parked and
    /// delayed jobs. The visitor stops the iteration by returning false.
    pub fn visit<F, V>(&self, filter: &F, mut visitor: V)
    where
        F: FutureFilter + ?Sized,
        V: FnMut(&FutureHandle) -> bool,
    {
        for task in self.inner.futures() {
            if task.state().is_terminal() {
                continue;
            }
            let future = FutureHandle::new(task);
            if filter.accept(&future) && !visitor(&future) {
                return;
            }
        }
    }

    /// Cancel every unfinished job matching `filter`
    ///
    /// Returns true if at least one job matched and every cancellation
    /// succeeded.
    pub fn cancel<F>(&self, filter: &F, interrupt: bool) -> bool
    where
        F: FutureFilter + ?Sized,
    {
        let mut matched = false;
        let mut all_cancelled = true;
        self.visit(filter, |future| {
            matched = true;
            all_cancelled &= future.cancel(interrupt);
            true
        });
        matched && all_cancelled
    }

    /// Cancel everything and stop accepting work
    ///
    /// Running jobs are interrupted and release their mutex when their body
    /// returns. Jobs scheduled afterwards are rejected.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        log::debug!("Shutting down scheduler");
        self.cancel(&|_: &FutureHandle| true, true);
        self.inner.timer.stop();
        self.inner.executor.shutdown();
        self.inner.notify_changed();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shutdown(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Block until `owner` has no job queued or running
    pub fn wait_for_idle(&self, owner: OwnerId, timeout: Duration) -> bool {
        match self.inner.semaphores.get(owner) {
            Some(semaphore) => semaphore.wait_for_idle(timeout),
            None => true,
        }
    }

    /// Permits held for `owner` (mutex owner plus waiters)
    pub fn permit_count(&self, owner: OwnerId) -> usize {
        self.inner
            .semaphores
            .get(owner)
            .map_or(0, |semaphore| semaphore.permit_count())
    }

    /// Job currently owning the mutex of `owner`
    pub fn mutex_owner(&self, owner: OwnerId) -> Option<FutureHandle> {
        self.inner
            .semaphores
            .get(owner)
            .and_then(|semaphore| semaphore.mutex_owner())
            .map(FutureHandle::new)
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        SchedulerStats {
            jobs_scheduled: counters.scheduled.load(Ordering::Relaxed),
            jobs_completed: counters.completed.load(Ordering::Relaxed),
            jobs_failed: counters.failed.load(Ordering::Relaxed),
            jobs_cancelled: counters.cancelled.load(Ordering::Relaxed),
            jobs_rejected: counters.rejected.load(Ordering::Relaxed),
            owners: self.inner.semaphores.count(),
            permits: self.inner.semaphores.total_permits(),
            blocked_jobs: self.inner.blocked.len(),
            delayed_jobs: self.inner.delayed.len(),
        }
    }
}

impl Default for MutualExclusionScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl fmt::Debug for MutualExclusionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutualExclusionScheduler")
            .field("owners", &self.inner.semaphores.count())
            .field("shut_down", &self.is_shutdown())
            .finish()
    }
}
