//! Robots.txt rule evaluation
//!
//! Allow/disallow decisions use the robotstxt crate's matcher (longest match
//! wins, allow wins ties). Crawl-delay is not covered by that crate and is
//! parsed here per user-agent group.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Longest crawl-delay honored; larger values are clamped to it
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(300);

/// A host's robots.txt rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRules {
    /// Raw robots.txt body; empty means allow everything
    body: String,
}

impl RobotsRules {
    pub fn parse(body: &str) -> Self {
        Self {
            body: body.to_string(),
        }
    }

    /// Rules for a host without a robots.txt
    pub fn allow_all() -> Self {
        Self {
            body: String::new(),
        }
    }

    /// Checks whether `url` (absolute, or a path) may be fetched by `agent`
    pub fn is_allowed(&self, url: &str, agent: &str) -> bool {
        if self.body.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.body, agent, url)
    }

    /// Crawl-delay for `agent`; a group naming the agent beats `*`
    ///
    /// # Arguments
    ///
    /// * `agent` - Product token to match against `User-agent` lines
    ///
    /// # Returns
    ///
    /// The delay, at most [`MAX_CRAWL_DELAY`], or `None` when no group that
    /// applies sets one.
    pub fn crawl_delay(&self, agent: &str) -> Option<Duration> {
        let agent = agent.to_ascii_lowercase();
        let mut group: Vec<String> = Vec::new();
        let mut reading_agents = false;
        let mut specific: Option<f64> = None;
        let mut wildcard: Option<f64> = None;

        for line in self.body.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                // consecutive user-agent lines share one group
                if !reading_agents {
                    group.clear();
                    reading_agents = true;
                }
                group.push(value.to_ascii_lowercase());
                continue;
            }
            reading_agents = false;

            if key != "crawl-delay" {
                continue;
            }
            let Ok(seconds) = value.parse::<f64>() else {
                continue;
            };
            if !seconds.is_finite() || seconds < 0.0 {
                continue;
            }

            for name in &group {
                if name == "*" {
                    wildcard.get_or_insert(seconds);
                } else if !name.is_empty() && agent.contains(name.as_str()) {
                    specific.get_or_insert(seconds);
                }
            }
        }

        specific.or(wildcard).map(|seconds| {
            Duration::try_from_secs_f64(seconds).map_or(MAX_CRAWL_DELAY, |d| d.min(MAX_CRAWL_DELAY))
        })
    }
}
