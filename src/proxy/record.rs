use crate::config::{ProxyConfig, SelectionPolicy};
use crate::proxy::{ProxyEndpoint, ProxyOutcome, ProxyStatus};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Availability {
    Available,
    Busy,
    Quarantined,
}

/// Health and load bookkeeping for one proxy endpoint
#[derive(Debug)]
pub(crate) struct ProxyRecord {
    endpoint: ProxyEndpoint,
    /// EWMA of success (1.0) and failure (0.0) outcomes
    health: f64,
    consecutive_failures: u32,
    in_flight: u32,
    last_used: Option<Instant>,
    latency_ewma: Option<Duration>,
    quarantine_level: u32,
    quarantined_until: Option<Instant>,
    /// Cooldown elapsed; one trial request decides whether it recovers
    probation: bool,
    window_start: Option<Instant>,
    window_count: u32,
}

impl ProxyRecord {
    pub(crate) fn new(endpoint: ProxyEndpoint) -> Self {
        Self {
            endpoint,
            health: 1.0,
            consecutive_failures: 0,
            in_flight: 0,
            last_used: None,
            latency_ewma: None,
            quarantine_level: 0,
            quarantined_until: None,
            probation: false,
            window_start: None,
            window_count: 0,
        }
    }

    /// Whether a new request may start now
    ///
    /// An expired quarantine moves the record onto probation here.
    pub(crate) fn availability(&mut self, now: Instant, config: &ProxyConfig) -> Availability {
        if let Some(until) = self.quarantined_until {
            if now < until {
                return Availability::Quarantined;
            }
            self.quarantined_until = None;
            self.probation = true;
        }

        if self.probation && self.in_flight > 0 {
            return Availability::Busy;
        }

        if self.in_flight >= config.max_concurrency_per_proxy {
            return Availability::Busy;
        }

        if config.rate_limit_requests > 0 {
            if let Some(start) = self.window_start {
                if now.saturating_duration_since(start) < config.rate_limit_window()
                    && self.window_count >= config.rate_limit_requests
                {
                    return Availability::Busy;
                }
            }
        }

        Availability::Available
    }

    pub(crate) fn is_quarantined(&self, now: Instant) -> bool {
        self.quarantined_until.is_some_and(|until| now < until)
    }

    pub(crate) fn quarantined_until(&self) -> Option<Instant> {
        self.quarantined_until
    }

    /// Window in which the rate limit will next let a request through
    pub(crate) fn window_reopens_at(&self, config: &ProxyConfig) -> Option<Instant> {
        if config.rate_limit_requests == 0 || self.window_count < config.rate_limit_requests {
            return None;
        }
        self.window_start.map(|start| start + config.rate_limit_window())
    }

    pub(crate) fn score(&self, now: Instant, policy: SelectionPolicy) -> f64 {
        let idle = match self.last_used {
            None => 1.0,
            Some(at) => (now.saturating_duration_since(at).as_secs_f64() / 30.0).min(1.0),
        };
        let load = 0.05 * f64::from(self.in_flight);

        match policy {
            SelectionPolicy::Balanced => self.health * 0.8 + idle * 0.2 - load,
            SelectionPolicy::LeastLatency => {
                let speed = self
                    .latency_ewma
                    .map_or(1.0, |latency| 1.0 / (1.0 + latency.as_secs_f64()));
                speed * 0.6 + self.health * 0.3 + idle * 0.1 - load
            }
        }
    }

    pub(crate) fn begin(&mut self, now: Instant, config: &ProxyConfig) {
        self.in_flight += 1;
        self.last_used = Some(now);

        if config.rate_limit_requests > 0 {
            let expired = self
                .window_start
                .map_or(true, |start| now.saturating_duration_since(start) >= config.rate_limit_window());
            if expired {
                self.window_start = Some(now);
                self.window_count = 0;
            }
            self.window_count += 1;
        }
    }

    /// Applies an outcome; returns the cooldown when this quarantines the proxy
    pub(crate) fn finish(
        &mut self,
        outcome: ProxyOutcome,
        now: Instant,
        config: &ProxyConfig,
    ) -> Option<Duration> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let decay = config.health_decay;

        match outcome {
            ProxyOutcome::Success => {
                self.health = self.health * (1.0 - decay) + decay;
                self.consecutive_failures = 0;
                if self.probation {
                    self.probation = false;
                    self.quarantine_level = 0;
                }
                None
            }
            ProxyOutcome::NetworkError | ProxyOutcome::Timeout => {
                self.health *= 1.0 - decay;
                self.consecutive_failures += 1;

                if self.probation || self.consecutive_failures >= config.failure_threshold {
                    Some(self.quarantine(now, config))
                } else {
                    None
                }
            }
            ProxyOutcome::Aborted => None,
        }
    }

    fn quarantine(&mut self, now: Instant, config: &ProxyConfig) -> Duration {
        let factor = 1u32.checked_shl(self.quarantine_level.min(16)).unwrap_or(u32::MAX);
        let cooldown = config
            .base_cooldown()
            .saturating_mul(factor)
            .min(config.max_cooldown());

        self.quarantined_until = Some(now + cooldown);
        self.quarantine_level += 1;
        self.consecutive_failures = 0;
        self.probation = false;
        cooldown
    }

    pub(crate) fn observe_latency(&mut self, latency: Duration, decay: f64) {
        self.latency_ewma = Some(match self.latency_ewma {
            None => latency,
            Some(previous) => {
                previous.mul_f64(1.0 - decay) + latency.mul_f64(decay)
            }
        });
    }

    /// Clears quarantine state and restores full health
    pub(crate) fn reinstate(&mut self) {
        self.health = 1.0;
        self.consecutive_failures = 0;
        self.quarantine_level = 0;
        self.quarantined_until = None;
        self.probation = false;
    }

    pub(crate) fn status(&self, now: Instant) -> ProxyStatus {
        ProxyStatus {
            endpoint: self.endpoint.clone(),
            health: self.health,
            in_flight: self.in_flight,
            consecutive_failures: self.consecutive_failures,
            quarantine_level: self.quarantine_level,
            quarantined: self.is_quarantined(now),
            probation: self.probation,
            latency: self.latency_ewma,
        }
    }
}
