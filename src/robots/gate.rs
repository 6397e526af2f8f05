use crate::config::{RobotsConfig, RobotsPolicy};
use crate::fetch::{fetch_with_lease, Fetcher};
use crate::proxy::{AcquireHint, ProxyPool};
use crate::robots::{CachedRobots, RobotsEntry, RobotsRules};
use crate::url::UrlKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a robots check for one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotsDecision {
    pub allowed: bool,
    /// Crawl-delay requested for our agent, if any
    pub crawl_delay: Option<Duration>,
}

type HostSlot = Arc<tokio::sync::Mutex<Option<CachedRobots>>>;

/// Per-origin robots.txt cache shared by every job of an engine
///
/// The map lock is only held to look up an origin's slot. Each slot has an
/// async lock held across the fetch, so an origin is fetched at most once at
/// a time and concurrent checks wait for that fetch.
pub struct RobotsGate {
    agent: String,
    config: RobotsConfig,
    timeout: Duration,
    fetcher: Arc<dyn Fetcher>,
    proxies: Arc<ProxyPool>,
    hosts: Mutex<HashMap<String, HostSlot>>,
}

impl RobotsGate {
    /// `agent` is the robots.txt product token matched against user-agent groups
    pub fn new(
        agent: impl Into<String>,
        config: RobotsConfig,
        timeout: Duration,
        fetcher: Arc<dyn Fetcher>,
        proxies: Arc<ProxyPool>,
    ) -> Self {
        Self {
            agent: agent.into(),
            config,
            timeout,
            fetcher,
            proxies,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Decides whether `key` may be fetched
    ///
    /// # Arguments
    ///
    /// * `key` - URL to check; its origin's robots.txt is fetched on a miss
    /// * `policy` - Applied when robots.txt could not be retrieved
    ///
    /// # Returns
    ///
    /// The decision plus the origin's crawl-delay for our agent.
    pub async fn check(&self, key: &UrlKey, policy: RobotsPolicy) -> RobotsDecision {
        match self.entry_for(key).await {
            RobotsEntry::Rules(rules) => RobotsDecision {
                allowed: rules.is_allowed(key.as_str(), &self.agent),
                crawl_delay: rules.crawl_delay(&self.agent),
            },
            RobotsEntry::Unavailable => RobotsDecision {
                allowed: policy == RobotsPolicy::AllowAll,
                crawl_delay: None,
            },
        }
    }

    /// Number of origins with a cache slot
    pub fn cached_hosts(&self) -> usize {
        self.hosts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn entry_for(&self, key: &UrlKey) -> RobotsEntry {
        let slot = {
            let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(hosts.entry(key.origin()).or_default())
        };

        let mut cached = slot.lock().await;
        if let Some(entry) = cached.as_ref() {
            if !entry.is_expired(Instant::now()) {
                return entry.entry.clone();
            }
        }

        let (entry, ttl) = self.fetch_rules(key).await;
        *cached = Some(CachedRobots::new(entry.clone(), ttl));
        entry
    }

    async fn fetch_rules(&self, key: &UrlKey) -> (RobotsEntry, Duration) {
        let url = key.robots_url();
        let hint = AcquireHint::new(key.authority(), None);

        let lease = match self.proxies.acquire(&hint).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Robots fetch for {} skipped: {}", key.origin(), e);
                return (RobotsEntry::Unavailable, self.config.failure_ttl());
            }
        };

        let result = fetch_with_lease(
            self.fetcher.as_ref(),
            &self.proxies,
            lease,
            &url,
            None,
            self.timeout,
            None,
        )
        .await;

        match result {
            Ok(response) if response.is_success() => {
                debug!("Loaded robots.txt for {}", key.origin());
                (
                    RobotsEntry::Rules(RobotsRules::parse(&response.body)),
                    self.config.ttl(),
                )
            }
            // 429 is a server-side throttle, not an absent file
            Ok(response) if (400..500).contains(&response.status) && response.status != 429 => {
                debug!(
                    "No robots.txt for {} (HTTP {}), allowing all",
                    key.origin(),
                    response.status
                );
                (RobotsEntry::Rules(RobotsRules::allow_all()), self.config.ttl())
            }
            Ok(response) => {
                warn!(
                    "robots.txt for {} unavailable: HTTP {}",
                    key.origin(),
                    response.status
                );
                (RobotsEntry::Unavailable, self.config.failure_ttl())
            }
            Err(e) => {
                warn!("robots.txt for {} unavailable: {}", key.origin(), e);
                (RobotsEntry::Unavailable, self.config.failure_ttl())
            }
        }
    }
}
