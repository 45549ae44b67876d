//! Predicates selecting scheduled jobs
//!
//! Used by [`is_done`](crate::MutualExclusionScheduler::is_done),
//! [`wait_until_done`](crate::MutualExclusionScheduler::wait_until_done),
//! [`visit`](crate::MutualExclusionScheduler::visit) and
//! [`cancel`](crate::MutualExclusionScheduler::cancel). Any
//! `Fn(&FutureHandle) -> bool` closure is a filter too.

use crate::scheduler::{FutureHandle, JobState};
use crate::sync::OwnerId;
use std::collections::HashSet;

/// Selects jobs by their handle
pub trait FutureFilter: Send + Sync {
    /// Whether `future` is selected
    fn accept(&self, future: &FutureHandle) -> bool;
}

impl<F> FutureFilter for F
where
    F: Fn(&FutureHandle) -> bool + Send + Sync,
{
    fn accept(&self, future: &FutureHandle) -> bool {
        self(future)
    }
}

/// Every job
pub fn always() -> impl FutureFilter {
    |_: &FutureHandle| true
}

/// Jobs of `owner`
pub fn owned_by(owner: OwnerId) -> impl FutureFilter {
    move |future: &FutureHandle| future.owner() == owner
}

/// Jobs with the given name
pub fn named(name: impl Into<String>) -> impl FutureFilter {
    let name = name.into();
    move |future: &FutureHandle| future.name() == name
}

/// Exactly the given jobs
pub fn futures<I>(futures: I) -> impl FutureFilter
where
    I: IntoIterator<Item = FutureHandle>,
{
    let ids: HashSet<_> = futures.into_iter().map(|future| future.id()).collect();
    move |future: &FutureHandle| ids.contains(&future.id())
}

/// Jobs parked in a blocking condition
pub fn blocked() -> impl FutureFilter {
    |future: &FutureHandle| future.state() == JobState::Blocked
}

/// Jobs selected by both filters
pub fn and<A, B>(a: A, b: B) -> impl FutureFilter
where
    A: FutureFilter,
    B: FutureFilter,
{
    move |future: &FutureHandle| a.accept(future) && b.accept(future)
}

/// Jobs not selected by `filter`
pub fn not<A>(filter: A) -> impl FutureFilter
where
    A: FutureFilter,
{
    move |future: &FutureHandle| !filter.accept(future)
}
