//! Modeljob: single-owner mutual-exclusion job scheduler
//!
//! This crate serializes logically sequential work (all jobs of one owner,
//! e.g. one user session) onto a single logical "model thread" while the
//! work physically runs on a shared worker pool:
//! - Mutex semaphore with FIFO tail and priority head insertion
//! - Blocking conditions (release the mutex, park, re-acquire with priority)
//! - Cooperative cancellation, interruption and expiration of jobs
//! - Recovery from worker-pool rejection without stalling the owner's queue

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod sync;

pub use config::{PoolConfig, SchedulerConfig};
pub use error::{ConfigError, JobError, JobResult, RejectedExecution};
pub use scheduler::{
    filter, DelayTimer, Executor, FutureFilter, FutureHandle, Job, JobContext, JobFuture, JobId,
    JobInput, JobState, MutualExclusionScheduler, SchedulerStats, WorkerPool,
};
pub use sync::{BlockingCondition, MutexSemaphore, OwnerId, SemaphoreRegistry};
