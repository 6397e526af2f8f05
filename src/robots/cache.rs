use crate::robots::RobotsRules;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// What is known about one origin's robots.txt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsEntry {
    Rules(RobotsRules),
    /// Fetch failed (5xx, network error, no proxy); the job's default applies
    Unavailable,
}

/// A cached entry with its expiry
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub entry: RobotsEntry,
    pub fetched_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CachedRobots {
    pub fn new(entry: RobotsEntry, ttl: Duration) -> Self {
        Self {
            entry,
            fetched_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
