use crate::url::UrlKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio::time::Instant;

/// A URL offered to the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: UrlKey,
    pub depth: u32,
    pub priority: i32,
    pub discovered_from: Option<UrlKey>,
}

impl Candidate {
    /// A start URL: depth 0, no parent
    pub fn seed(key: UrlKey) -> Self {
        Self {
            key,
            depth: 0,
            priority: 0,
            discovered_from: None,
        }
    }

    /// A link found on `parent`'s page
    ///
    /// Priority falls with depth so shallow pages are fetched first.
    pub fn discovered(key: UrlKey, parent: &FrontierItem) -> Self {
        let depth = parent.depth.saturating_add(1);
        Self {
            key,
            depth,
            priority: -(depth.min(i32::MAX as u32) as i32),
            discovered_from: Some(parent.key.clone()),
        }
    }
}

/// A unit of pending or in-flight work
#[derive(Debug, Clone)]
pub struct FrontierItem {
    pub key: UrlKey,
    pub depth: u32,
    pub priority: i32,
    pub discovered_from: Option<UrlKey>,
    /// Earliest time the item may be dequeued
    pub not_before: Instant,
    /// Retries already consumed
    pub attempts: u32,
    pub(crate) seq: u64,
}

impl FrontierItem {
    pub(crate) fn new(candidate: Candidate, seq: u64, now: Instant) -> Self {
        Self {
            key: candidate.key,
            depth: candidate.depth,
            priority: candidate.priority,
            discovered_from: candidate.discovered_from,
            not_before: now,
            attempts: 0,
            seq,
        }
    }
}

/// Ready heap ordering: priority desc, not-before asc, discovery order asc
#[derive(Debug)]
pub(crate) struct Ready(pub FrontierItem);

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.not_before.cmp(&self.0.not_before))
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for Ready {}

/// Delayed heap ordering: earliest not-before first
#[derive(Debug)]
pub(crate) struct Delayed(pub FrontierItem);

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .not_before
            .cmp(&self.0.not_before)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for Delayed {}

/// Serializable form of a pending item
///
/// `delay_ms` is the time remaining until `not_before` when the checkpoint was
/// taken; instants do not survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub key: UrlKey,
    pub depth: u32,
    pub priority: i32,
    pub discovered_from: Option<UrlKey>,
    pub delay_ms: u64,
    pub attempts: u32,
}

/// Everything needed to rebuild a frontier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierCheckpoint {
    /// Ordered by discovery sequence
    pub pending: Vec<PendingItem>,
    pub visited: Vec<UrlKey>,
}
