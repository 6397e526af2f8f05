//! Checkpoint store trait and error types

use crate::job::JobId;
use crate::storage::{CheckpointRecord, JobSummary};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence for job checkpoints
///
/// Implementations are called from blocking tasks and must be safe to share
/// between threads.
pub trait CheckpointStore: Send + Sync {
    /// Writes a job record, its pending work and any newly visited keys
    fn save(&self, record: &CheckpointRecord) -> StorageResult<()>;

    /// Loads a job's full checkpoint
    fn load(&self, id: &JobId) -> StorageResult<Option<CheckpointRecord>>;

    /// Summaries of every stored job, most recently updated first
    fn list(&self) -> StorageResult<Vec<JobSummary>>;

    /// Removes a job and its checkpoint; returns false if it did not exist
    fn delete(&self, id: &JobId) -> StorageResult<bool>;
}
