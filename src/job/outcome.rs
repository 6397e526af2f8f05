use crate::fetch::FetchResponse;
use crate::job::JobId;
use crate::url::UrlKey;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Terminal result of processing one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "code")]
pub enum OutcomeStatus {
    Success,
    /// Non-retryable HTTP status, or a retryable one after the last attempt
    HttpError(u16),
    NetworkError,
    Timeout,
    BlockedByRobots,
    /// No proxy could be acquired within the retry budget
    ProxyExhausted,
    ParseError,
    /// The parser does not handle this content type
    UnsupportedContent,
    AuthUnavailable,
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Policy-denied or filtered outcomes; counted as skipped, not failed
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::BlockedByRobots | Self::UnsupportedContent)
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success() && !self.is_skip()
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::HttpError(code) => write!(f, "http-error({})", code),
            Self::NetworkError => f.write_str("network-error"),
            Self::Timeout => f.write_str("timeout"),
            Self::BlockedByRobots => f.write_str("blocked-by-robots"),
            Self::ProxyExhausted => f.write_str("proxy-exhausted"),
            Self::ParseError => f.write_str("parse-error"),
            Self::UnsupportedContent => f.write_str("filtered-content"),
            Self::AuthUnavailable => f.write_str("auth-unavailable"),
        }
    }
}

/// Response details kept with an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMeta {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub bytes: usize,
}

impl From<&FetchResponse> for ResponseMeta {
    fn from(response: &FetchResponse) -> Self {
        Self {
            status: response.status,
            final_url: response.final_url.to_string(),
            content_type: response.content_type().map(str::to_string),
            bytes: response.body.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome {
    pub key: UrlKey,
    pub status: OutcomeStatus,
    /// Last response received, if any
    pub meta: Option<ResponseMeta>,
    /// Time spent on the final attempt, from dequeue to outcome
    pub elapsed: Duration,
    pub attempts: u32,
}

/// An outcome tagged with its job, as published by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeEvent {
    pub job_id: JobId,
    pub outcome: FetchOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(OutcomeStatus::Success.is_success());
        assert!(OutcomeStatus::BlockedByRobots.is_skip());
        assert!(OutcomeStatus::UnsupportedContent.is_skip());
        assert!(OutcomeStatus::HttpError(404).is_failure());
        assert!(OutcomeStatus::AuthUnavailable.is_failure());
        assert!(!OutcomeStatus::BlockedByRobots.is_failure());
    }

    #[test]
    fn test_display() {
        assert_eq!(OutcomeStatus::HttpError(503).to_string(), "http-error(503)");
        assert_eq!(OutcomeStatus::UnsupportedContent.to_string(), "filtered-content");
    }
}
