//! Error types shared across the scheduler
//!
//! Timeouts, interruptions, cancellations and rejections are ordinary
//! outcomes and travel through [`JobError`]. Contract violations (waiting on a
//! blocking condition or calling `run_now` outside the owning model thread)
//! are caller bugs and panic instead.

use thiserror::Error;

/// Outcome of a job or of a blocking call that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// A bounded wait elapsed before the awaited event happened
    #[error("Timed out waiting for job '{0}'")]
    Timeout(String),

    /// The job was interrupted (cancelled while running or parked)
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// The job was cancelled before producing a result
    #[error("Job '{0}' was cancelled")]
    Cancelled(String),

    /// The worker pool refused to run the job
    #[error("Job '{0}' was rejected by the worker pool")]
    Rejected(String),

    /// The job body returned an error or panicked
    #[error("Job '{job}' failed: {message}")]
    Failed {
        /// Name of the failing job
        job: String,
        /// Failure description
        message: String,
    },
}

impl JobError {
    /// Create a failure for the named job
    pub fn failed(job: impl Into<String>, message: impl Into<String>) -> Self {
        JobError::Failed {
            job: job.into(),
            message: message.into(),
        }
    }

    /// Whether this is a timeout outcome
    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout(_))
    }

    /// Whether this is an interruption outcome
    pub fn is_interruption(&self) -> bool {
        matches!(self, JobError::Interrupted(_))
    }

    /// Whether the job never ran to completion because it was cancelled or rejected
    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::Cancelled(_) | JobError::Rejected(_))
    }
}

/// Result of a job body
pub type JobResult<T> = Result<T, JobError>;

/// Returned by an [`Executor`](crate::scheduler::Executor) that refuses a job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectedExecution {
    /// The pool has been shut down
    #[error("Worker pool is shut down")]
    Shutdown,

    /// All threads are busy and the backlog is full
    #[error("Worker pool saturated ({threads} threads busy, {queued} jobs queued)")]
    Saturated {
        /// Live worker threads
        threads: usize,
        /// Jobs waiting for a thread
        queued: usize,
    },
}

/// Errors raised while loading a [`SchedulerConfig`](crate::config::SchedulerConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value is out of range or inconsistent
    #[error("Invalid config: {0}")]
    ValidationError(String),
}
