//! Mutual-exclusion job scheduler
//!
//! This module maps every owner to one logical "model thread": jobs of an
//! owner are executed one at a time by whichever pool thread currently holds
//! that owner's mutex.

mod context;
pub mod filter;
mod future;
mod input;
mod pool;
#[allow(clippy::module_inception)]
pub(crate) mod scheduler;
pub(crate) mod task;
mod timer;

pub use context::JobContext;
pub use filter::FutureFilter;
pub use future::{FutureHandle, JobFuture};
pub use input::JobInput;
pub use pool::{Executor, Job, WorkerPool};
pub use scheduler::{MutualExclusionScheduler, SchedulerStats};
pub use task::{JobId, JobState};
pub use timer::DelayTimer;
