//! Fetch execution
//!
//! The [`Fetcher`] trait performs a single request; [`HttpFetcher`] is the
//! reqwest-backed default. A rendering fetcher would implement the same trait.
//! [`fetch_with_lease`] runs a fetch through a proxy lease with a timeout and
//! hands the lease back to the pool.

mod http;
mod routed;
#[cfg(test)]
pub(crate) mod scripted;

use crate::proxy::{ProxyEndpoint, ProxyOutcome};
use crate::session::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub use http::{build_http_client, HttpFetcher};
pub use routed::fetch_with_lease;

/// One request to perform
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a Url,
    pub proxy: Option<&'a ProxyEndpoint>,
    pub session: Option<&'a Session>,
    pub timeout: Duration,
}

/// A received HTTP response, whatever its status
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after redirects
    pub final_url: Url,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses `Retry-After` as delta-seconds or an HTTP date
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.header("retry-after")?.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        let at = DateTime::parse_from_rfc2822(value).ok()?;
        let delta = at.with_timezone(&Utc) - Utc::now();
        Some(delta.to_std().unwrap_or(Duration::ZERO))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("fetch aborted")]
    Aborted,
}

impl FetchError {
    /// How this failure reflects on the proxy that carried it
    pub fn proxy_outcome(&self) -> ProxyOutcome {
        match self {
            Self::Timeout => ProxyOutcome::Timeout,
            Self::Aborted => ProxyOutcome::Aborted,
            Self::Connect(_) | Self::Network(_) | Self::Request(_) => ProxyOutcome::NetworkError,
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError>;
}
