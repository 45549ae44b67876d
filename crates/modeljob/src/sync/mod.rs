//! Synchronization primitives
//!
//! This module provides the building blocks the scheduler is made of:
//! - Owner identities and the per-owner mutex semaphore
//! - The owner → semaphore registry
//! - Blocking conditions a job can wait on without holding its mutex

mod condition;
mod owner_id;
mod parker;
mod registry;
mod semaphore;

pub use condition::BlockingCondition;
pub use owner_id::OwnerId;
pub(crate) use parker::Parker;
pub use registry::SemaphoreRegistry;
pub use semaphore::MutexSemaphore;
