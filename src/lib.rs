//! Driftnet: a crawl orchestration core
//!
//! This crate drives web crawl jobs: a per-job frontier with at-most-once URL
//! admission, a bounded pool of fetch workers, a shared proxy pool with health
//! tracking and quarantine, a robots.txt gate, and a job state machine that
//! checkpoints enough state to resume after a restart.
//!
//! Parsing, fetching, session acquisition and record export are collaborators
//! behind traits ([`fetch::Fetcher`], [`parse::Parser`],
//! [`session::SessionProvider`], [`sink::RecordSink`]); each ships with a
//! default implementation.

pub mod config;
pub mod engine;
pub mod fetch;
pub mod frontier;
pub mod job;
pub mod parse;
pub mod proxy;
pub mod robots;
pub mod session;
pub mod sink;
pub mod state;
pub mod storage;
pub mod url;
mod worker;

use thiserror::Error;

/// Main error type for driftnet operations
#[derive(Debug, Error)]
pub enum DriftnetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Job error: {0}")]
    Job(#[from] job::JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Proxy source error: {0}")]
    ProxySource(#[from] proxy::ProxySourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] sink::SinkError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for driftnet operations
pub type Result<T> = std::result::Result<T, DriftnetError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{Config, JobConfig};
pub use engine::{Engine, EngineBuilder};
pub use job::{CancelMode, FetchOutcome, JobId, JobSnapshot, OutcomeStatus};
pub use state::JobStatus;
pub use url::UrlKey;
