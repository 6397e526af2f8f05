//! Checkpoint persistence
//!
//! Each job's checkpoint is its record (status, settings, counters, seeds),
//! the set of visited keys, and the pending frontier items at the time of
//! the save. Resuming a job rebuilds its frontier from these.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteCheckpointStore;
pub use traits::{CheckpointStore, StorageError, StorageResult};

use crate::config::JobConfig;
use crate::frontier::FrontierCheckpoint;
use crate::job::{CounterSnapshot, JobId};
use crate::state::JobStatus;
use crate::url::UrlKey;
use chrono::{DateTime, Utc};

/// Everything persisted for one job
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub config: JobConfig,
    pub config_hash: Option<String>,
    pub seeds: Vec<UrlKey>,
    pub counters: CounterSnapshot,
    pub frontier: FrontierCheckpoint,
    /// Reason recorded when the job failed
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored job without its frontier
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub config_hash: Option<String>,
    pub counters: CounterSnapshot,
    pub pending: u64,
    pub visited: u64,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
