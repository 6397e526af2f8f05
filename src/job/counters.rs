use crate::config::JobConfig;
use crate::frontier::Admission;
use crate::job::OutcomeStatus;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Point-in-time copy of a job's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterSnapshot {
    /// URLs admitted to the frontier
    pub enqueued: u64,
    /// Fetch attempts that produced an HTTP response
    pub fetched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Robots-blocked and filtered-content outcomes
    pub skipped: u64,
    pub retried: u64,
    /// Discovered links rejected by scope filters
    pub filtered: u64,
    pub duplicates: u64,
    pub records_emitted: u64,
    pub emit_failures: u64,
    /// Fetch attempts, successful or not
    pub attempts: u64,
    /// Attempts that ended in a transient failure
    pub attempt_failures: u64,
    pub consecutive_failures: u64,
}

impl CounterSnapshot {
    /// URLs with a terminal outcome
    pub fn terminal(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    pub fn error_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.attempt_failures as f64 / self.attempts as f64
        }
    }
}

/// Job counters behind one mutex so snapshots are consistent
#[derive(Debug, Default)]
pub struct JobCounters {
    inner: Mutex<CounterSnapshot>,
}

impl JobCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CounterSnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CounterSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        *self.lock()
    }

    pub fn record_admission(&self, admission: &Admission) {
        let mut c = self.lock();
        match admission {
            Admission::Admitted => c.enqueued += 1,
            Admission::Duplicate => c.duplicates += 1,
            Admission::Filtered(_) => c.filtered += 1,
            Admission::Closed => {}
        }
    }

    /// Records a fetch attempt; returns the updated counters
    pub fn record_attempt(&self, responded: bool, transient_failure: bool) -> CounterSnapshot {
        let mut c = self.lock();
        c.attempts += 1;
        if responded {
            c.fetched += 1;
        }
        if transient_failure {
            c.attempt_failures += 1;
            c.consecutive_failures += 1;
        } else {
            c.consecutive_failures = 0;
        }
        *c
    }

    pub fn record_retry(&self) {
        self.lock().retried += 1;
    }

    /// Records a terminal outcome; returns the updated counters
    pub fn record_outcome(&self, status: OutcomeStatus) -> CounterSnapshot {
        let mut c = self.lock();
        if status.is_success() {
            c.succeeded += 1;
        } else if status.is_skip() {
            c.skipped += 1;
        } else {
            c.failed += 1;
        }
        *c
    }

    pub fn record_emit(&self, ok: bool) {
        let mut c = self.lock();
        if ok {
            c.records_emitted += 1;
        } else {
            c.emit_failures += 1;
        }
    }
}

/// Thresholds that turn per-item failures into a systemic job failure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    pub max_error_rate: f64,
    pub min_samples: u64,
    /// 0 disables the check
    pub max_consecutive_failures: u64,
}

impl HealthPolicy {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            max_error_rate: config.max_error_rate,
            min_samples: config.min_samples,
            max_consecutive_failures: u64::from(config.max_consecutive_failures),
        }
    }

    /// Returns the failure reason if the counters cross a threshold
    pub fn evaluate(&self, counters: &CounterSnapshot) -> Option<String> {
        if self.max_consecutive_failures > 0
            && counters.consecutive_failures >= self.max_consecutive_failures
        {
            return Some(format!(
                "{} consecutive transient failures",
                counters.consecutive_failures
            ));
        }

        if counters.attempts >= self.min_samples.max(1) {
            let rate = counters.error_rate();
            if rate > self.max_error_rate {
                return Some(format!(
                    "error rate {:.2} exceeds {:.2} over {} attempts",
                    rate, self.max_error_rate, counters.attempts
                ));
            }
        }

        None
    }
}
