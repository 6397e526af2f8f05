//! URL handling module for driftnet
//!
//! Every URL that enters a job is reduced to a [`UrlKey`]: the normalized
//! canonical form used for deduplication, robots lookups and politeness
//! bookkeeping. [`Scope`] decides which keys a job is willing to crawl.

mod matcher;
mod normalize;
mod scope;

use crate::{UrlError, UrlResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub use matcher::host_matches;
pub use normalize::{normalize_parsed, normalize_url};
pub use scope::{FilterReason, Scope};

/// Normalized canonical URL
///
/// Two URLs that differ only in normalization-insignificant ways (host case,
/// default port, fragment, dot segments, tracking parameters, query order)
/// produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UrlKey(Url);

impl UrlKey {
    /// Parses and normalizes an absolute URL
    pub fn parse(input: &str) -> UrlResult<Self> {
        normalize_url(input).map(Self)
    }

    /// Resolves a possibly-relative reference against `base`, then normalizes
    pub fn resolve(base: &Url, href: &str) -> UrlResult<Self> {
        let joined = base
            .join(href.trim())
            .map_err(|e| UrlError::Parse(e.to_string()))?;
        normalize_parsed(joined).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Lowercase host without port
    pub fn host(&self) -> &str {
        // normalization rejects URLs without a host
        self.0.host_str().unwrap_or_default()
    }

    /// Host plus explicit port, the unit for politeness and host caps
    pub fn authority(&self) -> String {
        match self.0.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    /// Scheme, host and port; robots.txt rules apply per origin
    pub fn origin(&self) -> String {
        self.0.origin().ascii_serialization()
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// The robots.txt location for this key's origin
    pub fn robots_url(&self) -> Url {
        let mut url = self.0.clone();
        url.set_path("/robots.txt");
        url.set_query(None);
        url
    }
}

impl fmt::Display for UrlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for UrlKey {
    type Error = UrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UrlKey> for String {
    fn from(key: UrlKey) -> Self {
        key.0.into()
    }
}
