//! Content parsing: records to export and links to follow
//!
//! [`HtmlParser`] is the default [`Parser`]; it emits one page record per
//! HTML response and the page's followable links.

mod html;

use crate::fetch::FetchResponse;
use crate::url::UrlKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use html::HtmlParser;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The response is not a content type this parser handles
    #[error("unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("malformed content: {0}")]
    Malformed(String),
}

/// An extracted item handed to the record sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// URL the record was extracted from
    pub source: String,
    /// Record type, e.g. "page"
    pub kind: String,
    pub data: serde_json::Value,
    pub extracted_at: DateTime<Utc>,
}

impl Record {
    pub fn new(source: &UrlKey, kind: &str, data: serde_json::Value) -> Self {
        Self {
            source: source.to_string(),
            kind: kind.to_string(),
            data,
            extracted_at: Utc::now(),
        }
    }
}

/// What a parser extracted from one response
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub records: Vec<Record>,
    /// Absolute http(s) URLs, not yet normalized
    pub links: Vec<String>,
}

pub trait Parser: Send + Sync {
    fn parse(&self, response: &FetchResponse, key: &UrlKey) -> Result<ParsedPage, ParseError>;
}
