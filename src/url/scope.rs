use crate::config::JobConfig;
use crate::url::{host_matches, UrlKey};
use std::fmt;

/// Why a discovered URL was kept out of the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterReason {
    DepthExceeded,
    OffDomain,
    ExcludedExtension,
    /// The job already admitted `max-pages` URLs
    PageLimit,
    /// The URL's host would exceed `max-domains`
    DomainLimit,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DepthExceeded => "depth_exceeded",
            Self::OffDomain => "off_domain",
            Self::ExcludedExtension => "excluded_extension",
            Self::PageLimit => "page_limit",
            Self::DomainLimit => "domain_limit",
        };
        f.write_str(s)
    }
}

/// The set of URLs a job is willing to crawl
///
/// Under `same-domain-only` a URL is in scope when its host equals a seed host
/// or matches one of `allowed-domains`. Without it every host is in scope.
#[derive(Debug, Clone)]
pub struct Scope {
    max_depth: u32,
    same_domain_only: bool,
    seed_hosts: Vec<String>,
    allowed_domains: Vec<String>,
    excluded_extensions: Vec<String>,
}

impl Scope {
    pub fn new(config: &JobConfig, seeds: &[UrlKey]) -> Self {
        let mut seed_hosts: Vec<String> = seeds.iter().map(|s| s.host().to_string()).collect();
        seed_hosts.sort();
        seed_hosts.dedup();

        Self {
            max_depth: config.max_depth,
            same_domain_only: config.same_domain_only,
            seed_hosts,
            allowed_domains: config.allowed_domains.clone(),
            excluded_extensions: config
                .exclude_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Returns `Ok(())` when `key` at `depth` may enter the frontier
    pub fn check(&self, key: &UrlKey, depth: u32) -> Result<(), FilterReason> {
        if depth > self.max_depth {
            return Err(FilterReason::DepthExceeded);
        }

        if self.same_domain_only && !self.host_in_scope(key.host()) {
            return Err(FilterReason::OffDomain);
        }

        let path = key.path().to_ascii_lowercase();
        if self
            .excluded_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
        {
            return Err(FilterReason::ExcludedExtension);
        }

        Ok(())
    }

    fn host_in_scope(&self, host: &str) -> bool {
        self.seed_hosts.iter().any(|h| h == host)
            || self
                .allowed_domains
                .iter()
                .any(|pattern| host_matches(pattern, host))
    }
}
