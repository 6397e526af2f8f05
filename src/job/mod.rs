//! Crawl jobs: lifecycle, counters and outcomes
//!
//! A [`Job`] owns its frontier, counters and politeness state. Engine-wide
//! collaborators (proxy pool, robots gate, fetcher, parser, sink) are shared
//! in through the engine.

mod counters;
mod machine;
mod outcome;

use crate::state::JobStatus;
use crate::storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

pub use counters::{CounterSnapshot, HealthPolicy, JobCounters};
pub use machine::{CancelMode, Job, JobSnapshot};
pub(crate) use machine::JobShared;
pub use outcome::{FetchOutcome, OutcomeEvent, OutcomeStatus, ResponseMeta};

/// Job identifier (UUID v4)
pub type JobId = Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already loaded: {0}")]
    AlreadyLoaded(JobId),

    #[error("Job is still running: {0}")]
    StillRunning(JobId),

    #[error("No checkpoint store configured")]
    NoStore,

    #[error("Checkpoint error: {0}")]
    Storage(#[from] StorageError),
}
