//! Record export
//!
//! Workers never wait on the export collaborator: [`ResultSinkAdapter`]
//! queues records on an unbounded channel and a background task hands them
//! to the [`RecordSink`], counting failures instead of propagating them.

mod adapter;
mod jsonl;
mod memory;

use crate::parse::Record;
use async_trait::async_trait;
use thiserror::Error;

pub use adapter::{LinkAdmission, ResultSinkAdapter};
pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

/// Destination for extracted records
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn emit(&self, record: Record) -> Result<(), SinkError>;

    /// Called when a job run stops
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
