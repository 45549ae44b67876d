//! Job submission descriptor

use crate::sync::OwnerId;
use std::time::Duration;

/// Describes how a job is to be scheduled
///
/// Only the owner is mandatory; it decides which mutex the job competes for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    owner: OwnerId,
    name: Option<String>,
    expiration: Option<Duration>,
}

impl JobInput {
    /// Input for a job of `owner` with default name and no expiration
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            name: None,
            expiration: None,
        }
    }

    /// Name used in logs, errors and filters
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Cancel the job if it is still queued `expiration` after entering the queue
    pub fn expire_after(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Apply `expiration` unless one is set already
    pub(crate) fn or_expire_after(mut self, expiration: Option<Duration>) -> Self {
        if self.expiration.is_none() {
            self.expiration = expiration;
        }
        self
    }

    /// Owner whose mutex the job runs under
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Explicit name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Expiration measured from the moment the job is queued
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }
}

impl From<OwnerId> for JobInput {
    fn from(owner: OwnerId) -> Self {
        JobInput::new(owner)
    }
}
