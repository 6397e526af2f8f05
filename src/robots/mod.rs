//! Robots.txt compliance
//!
//! [`RobotsGate`] fetches and caches robots.txt per origin and answers
//! allow/deny plus crawl-delay for each URL a worker is about to fetch.

mod cache;
mod gate;
mod parser;

pub use crate::config::RobotsPolicy;
pub use cache::{CachedRobots, RobotsEntry};
pub use gate::{RobotsDecision, RobotsGate};
pub use parser::{RobotsRules, MAX_CRAWL_DELAY};
