//! Registry mapping owners to their mutex semaphores

use crate::sync::{MutexSemaphore, OwnerId};
use dashmap::DashMap;
use std::sync::Arc;

/// Owner → semaphore map
///
/// A semaphore is created the first time an owner queues work. Callers drop
/// it again with [`remove_if_idle`](Self::remove_if_idle) once nobody holds
/// or waits for it; a later job of the same owner gets a fresh one.
pub struct SemaphoreRegistry<T> {
    semaphores: DashMap<OwnerId, Arc<MutexSemaphore<T>>>,
}

impl<T: Clone + PartialEq> SemaphoreRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            semaphores: DashMap::new(),
        }
    }

    /// Get the semaphore of `owner`, creating it on first use
    pub fn get_or_create(&self, owner: OwnerId) -> Arc<MutexSemaphore<T>> {
        self.semaphores
            .entry(owner)
            .or_insert_with(|| Arc::new(MutexSemaphore::new()))
            .clone()
    }

    /// Get the semaphore of `owner` if it exists
    pub fn get(&self, owner: OwnerId) -> Option<Arc<MutexSemaphore<T>>> {
        self.semaphores.get(&owner).map(|entry| entry.clone())
    }

    /// Number of registered owners
    pub fn count(&self) -> usize {
        self.semaphores.len()
    }

    /// All registered owners
    pub fn owners(&self) -> Vec<OwnerId> {
        self.semaphores.iter().map(|entry| *entry.key()).collect()
    }

    /// All registered semaphores
    pub fn semaphores(&self) -> Vec<Arc<MutexSemaphore<T>>> {
        self.semaphores.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Total permits across owners
    pub fn total_permits(&self) -> usize {
        self.semaphores.iter().map(|entry| entry.permit_count()).sum()
    }

    /// Remove the semaphore of `owner` if it has no owner and no waiters
    ///
    /// Returns true if an entry was removed.
    pub fn remove_if_idle(&self, owner: OwnerId) -> bool {
        self.semaphores
            .remove_if(&owner, |_, semaphore| semaphore.is_idle())
            .is_some()
    }

    /// Drop every semaphore
    pub fn clear(&self) {
        self.semaphores.clear();
    }
}

impl<T: Clone + PartialEq> Default for SemaphoreRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry: SemaphoreRegistry<u32> = SemaphoreRegistry::new();
        assert_eq!(registry.count(), 0);
        assert!(registry.get(OwnerId::new()).is_none());
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let registry = SemaphoreRegistry::new();
        let owner = OwnerId::new();

        let a = registry.get_or_create(owner);
        let b = registry.get_or_create(owner);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.count(), 1);

        a.try_acquire_else_offer_tail(1u32);
        assert_eq!(registry.get(owner).unwrap().permit_count(), 1);
    }

    #[test]
    fn test_owners_are_independent() {
        let registry = SemaphoreRegistry::new();
        let o1 = OwnerId::new();
        let o2 = OwnerId::new();

        assert!(registry.get_or_create(o1).try_acquire_else_offer_tail(1u32));
        assert!(registry.get_or_create(o2).try_acquire_else_offer_tail(2u32));
        assert!(!registry.get_or_create(o1).try_acquire_else_offer_tail(3u32));

        assert_eq!(registry.total_permits(), 3);
        let owners = registry.owners();
        assert!(owners.contains(&o1));
        assert!(owners.contains(&o2));
    }

    #[test]
    fn test_remove_if_idle() {
        let registry = SemaphoreRegistry::new();
        let owner = OwnerId::new();

        let semaphore = registry.get_or_create(owner);
        semaphore.try_acquire_else_offer_tail(1u32);
        assert!(!registry.remove_if_idle(owner));
        assert_eq!(registry.count(), 1);

        semaphore.release_and_poll();
        assert!(registry.remove_if_idle(owner));
        assert!(registry.get(owner).is_none());
        assert!(!registry.remove_if_idle(owner));

        let fresh = registry.get_or_create(owner);
        assert!(!Arc::ptr_eq(&semaphore, &fresh));
    }

    #[test]
    fn test_registry_clear() {
        let registry: SemaphoreRegistry<u32> = SemaphoreRegistry::new();
        registry.get_or_create(OwnerId::new());
        registry.get_or_create(OwnerId::new());
        assert_eq!(registry.semaphores().len(), 2);

        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
