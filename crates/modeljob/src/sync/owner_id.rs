//! Identity of a logical owner (e.g. one user session)

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unit of serialization: jobs sharing an `OwnerId` never run concurrently
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    /// Allocate a new process-unique OwnerId
    pub fn new() -> Self {
        OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Wrap an externally assigned id (session number, tenant, ...)
    pub fn from_u64(id: u64) -> Self {
        OwnerId(id)
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}
