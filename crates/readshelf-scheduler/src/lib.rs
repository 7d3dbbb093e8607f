//! Scheduled cache invalidation.
//!
//! Jobs pair a `CleanupSchedule` (daily, weekly, or fixed interval) with a
//! set of invalidation rules (namespace bump, key patterns, tags) and run
//! on background tokio tasks. Schedule validation happens at registration;
//! a job that registered successfully keeps running regardless of how its
//! individual runs fare.

use thiserror::Error;

pub mod schedule;
pub mod scheduler;

pub use schedule::CleanupSchedule;
pub use scheduler::{CleanupJob, CleanupOutcome, InvalidationScheduler, JobInfo, execute};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule: {0}")]
    InvalidConfiguration(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("job already registered: {0}")]
    DuplicateJob(String),
}
