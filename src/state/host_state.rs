use crate::config::JobConfig;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on any single host wait: spacing, crawl-delay or cool-down
pub const MAX_HOST_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// `at + by`, with `by` clamped to [`MAX_HOST_WAIT`]
fn later(at: Instant, by: Duration) -> Instant {
    at.checked_add(by.min(MAX_HOST_WAIT)).unwrap_or(at)
}

/// Politeness state for one host
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// Number of requests made to this host
    pub request_count: u64,

    /// When the last request to this host was started
    pub last_request_time: Option<Instant>,

    /// Set after HTTP 429/503; no requests before this instant
    pub blocked_until: Option<Instant>,

    /// From the host's robots.txt
    pub crawl_delay: Option<Duration>,

    /// Items handed to workers and not yet finished
    pub in_flight: u32,

    /// One handed-out item has not started its request yet
    pub awaiting_start: bool,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest instant the next request may start, if one is due later
    pub fn ready_at(&self, delay: Duration) -> Option<Instant> {
        let spaced = self.last_request_time.map(|last| later(last, delay));
        match (spaced, self.blocked_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time to wait before the next request, or `None` if one can start now
    pub fn time_until_next_request(&self, delay: Duration, now: Instant) -> Option<Duration> {
        let ready_at = self.ready_at(delay)?;
        (ready_at > now).then(|| ready_at - now)
    }

    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Blocks the host until `until`; an existing later block is kept
    pub fn mark_rate_limited(&mut self, until: Instant) {
        self.blocked_until = Some(self.blocked_until.map_or(until, |b| b.max(until)));
    }

    pub fn is_rate_limited(&self, now: Instant) -> bool {
        self.blocked_until.map_or(false, |b| b > now)
    }
}

/// Whether a host can take another request right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostReadiness {
    Ready,
    /// Spacing or a cool-down holds the host until this instant
    WaitUntil(Instant),
    /// At its concurrency cap, or an earlier item has yet to start; the host
    /// frees up when that item starts or finishes
    Busy,
}

/// Per-host request spacing and concurrency for one job
///
/// The spacing is the job's politeness override when set, otherwise the
/// larger of the minimum host delay and the host's robots crawl-delay. While
/// spacing is non-zero at most one item per host is between dispatch and
/// request start, so the spacing is measured from actual request starts.
///
/// Not synchronized: the frontier owns it under its own lock.
#[derive(Debug)]
pub struct HostThrottle {
    hosts: HashMap<String, HostState>,
    min_delay: Duration,
    override_delay: Option<Duration>,
    host_cap: Option<u32>,
}

impl Default for HostThrottle {
    fn default() -> Self {
        Self::new(Duration::ZERO, None)
    }
}

impl HostThrottle {
    pub fn new(min_delay: Duration, override_delay: Option<Duration>) -> Self {
        Self {
            hosts: HashMap::new(),
            min_delay,
            override_delay,
            host_cap: None,
        }
    }

    /// Limits the items of one host handed out at once
    pub fn with_host_cap(mut self, cap: Option<u32>) -> Self {
        self.host_cap = cap;
        self
    }

    pub fn from_config(config: &JobConfig) -> Self {
        Self::new(config.min_host_delay(), config.politeness_override())
            .with_host_cap(config.per_host_concurrency)
    }

    pub fn effective_delay(&self, crawl_delay: Option<Duration>) -> Duration {
        match self.override_delay {
            Some(delay) => delay,
            None => crawl_delay.map_or(self.min_delay, |d| d.max(self.min_delay)),
        }
    }

    pub fn readiness(&self, host: &str, now: Instant) -> HostReadiness {
        let Some(state) = self.hosts.get(host) else {
            return HostReadiness::Ready;
        };
        let delay = self.effective_delay(state.crawl_delay);

        if (state.awaiting_start && !delay.is_zero())
            || self.host_cap.is_some_and(|cap| state.in_flight >= cap)
        {
            return HostReadiness::Busy;
        }

        match state.ready_at(delay) {
            Some(at) if at > now => HostReadiness::WaitUntil(at),
            _ => HostReadiness::Ready,
        }
    }

    /// Records that an item for `host` was handed to a worker
    pub fn dispatch(&mut self, host: &str) {
        let state = self.hosts.entry(host.to_string()).or_default();
        state.in_flight += 1;
        state.awaiting_start = true;
    }

    /// Records that a dispatched item is sending its request now
    pub fn start_request(&mut self, host: &str, now: Instant) {
        let state = self.hosts.entry(host.to_string()).or_default();
        state.awaiting_start = false;
        state.record_request(now);
    }

    /// Records that a dispatched item is finished or handed back
    ///
    /// `started` tells whether it got as far as [`start_request`](Self::start_request).
    pub fn release(&mut self, host: &str, started: bool) {
        if let Some(state) = self.hosts.get_mut(host) {
            state.in_flight = state.in_flight.saturating_sub(1);
            if !started {
                state.awaiting_start = false;
            }
        }
    }

    pub fn set_crawl_delay(&mut self, host: &str, crawl_delay: Option<Duration>) {
        self.hosts.entry(host.to_string()).or_default().crawl_delay = crawl_delay;
    }

    /// Blocks `host` for `cooldown` from `now`; waits beyond
    /// [`MAX_HOST_WAIT`] are clamped
    pub fn mark_rate_limited(&mut self, host: &str, cooldown: Duration, now: Instant) {
        self.hosts
            .entry(host.to_string())
            .or_default()
            .mark_rate_limited(later(now, cooldown));
    }

    pub fn request_count(&self, host: &str) -> u64 {
        self.hosts.get(host).map_or(0, |s| s.request_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn started(throttle: &mut HostThrottle, host: &str, now: Instant) {
        throttle.dispatch(host);
        throttle.start_request(host, now);
        throttle.release(host, true);
    }

    #[test]
    fn test_new_host_ready() {
        let state = HostState::new();
        assert!(state.time_until_next_request(SECOND, Instant::now()).is_none());
        assert_eq!(state.request_count, 0);
    }

    #[test]
    fn test_spacing_after_request() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.record_request(now);

        assert_eq!(state.time_until_next_request(SECOND, now), Some(SECOND));
        assert_eq!(
            state.time_until_next_request(SECOND, now + Duration::from_millis(400)),
            Some(Duration::from_millis(600))
        );
        assert!(state
            .time_until_next_request(SECOND, now + Duration::from_millis(1100))
            .is_none());
    }

    #[test]
    fn test_rate_limit_block_outlasts_spacing() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.record_request(now);
        state.mark_rate_limited(now + Duration::from_secs(5));
        state.mark_rate_limited(now + Duration::from_secs(2));

        assert!(state.is_rate_limited(now));
        assert_eq!(
            state.time_until_next_request(SECOND, now),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_huge_spacing_does_not_overflow() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.record_request(now);

        assert_eq!(
            state.time_until_next_request(Duration::MAX, now),
            Some(MAX_HOST_WAIT)
        );
    }

    #[test]
    fn test_effective_delay() {
        let throttle = HostThrottle::new(SECOND, None);
        assert_eq!(throttle.effective_delay(None), SECOND);
        assert_eq!(throttle.effective_delay(Some(Duration::from_millis(10))), SECOND);
        assert_eq!(
            throttle.effective_delay(Some(Duration::from_secs(4))),
            Duration::from_secs(4)
        );

        let fixed = HostThrottle::new(SECOND, Some(Duration::ZERO));
        assert_eq!(fixed.effective_delay(Some(Duration::from_secs(4))), Duration::ZERO);
    }

    #[test]
    fn test_spacing_is_per_host() {
        let mut throttle = HostThrottle::new(SECOND, None);
        let now = Instant::now();

        assert_eq!(throttle.readiness("a.com", now), HostReadiness::Ready);
        started(&mut throttle, "a.com", now);

        assert_eq!(
            throttle.readiness("a.com", now),
            HostReadiness::WaitUntil(now + SECOND)
        );
        assert_eq!(throttle.readiness("b.com", now), HostReadiness::Ready);
        assert_eq!(throttle.readiness("a.com", now + SECOND), HostReadiness::Ready);
        assert_eq!(throttle.request_count("a.com"), 1);
        assert_eq!(throttle.request_count("c.com"), 0);
    }

    #[test]
    fn test_unstarted_dispatch_holds_spaced_host() {
        let mut throttle = HostThrottle::new(SECOND, None);
        let now = Instant::now();

        throttle.dispatch("a.com");
        assert_eq!(throttle.readiness("a.com", now), HostReadiness::Busy);

        // Handed back without a request: no spacing is owed
        throttle.release("a.com", false);
        assert_eq!(throttle.readiness("a.com", now), HostReadiness::Ready);
        assert_eq!(throttle.request_count("a.com"), 0);
    }

    #[test]
    fn test_zero_delay_never_waits() {
        let mut throttle = HostThrottle::new(Duration::ZERO, None);
        let now = Instant::now();
        for _ in 0..5 {
            assert_eq!(throttle.readiness("a.com", now), HostReadiness::Ready);
            throttle.dispatch("a.com");
        }
        throttle.start_request("a.com", now);
        assert_eq!(throttle.readiness("a.com", now), HostReadiness::Ready);
    }

    #[test]
    fn test_host_cap_counts_in_flight() {
        let mut throttle = HostThrottle::new(Duration::ZERO, None).with_host_cap(Some(2));
        let now = Instant::now();

        throttle.dispatch("a.com");
        throttle.dispatch("a.com");
        assert_eq!(throttle.readiness("a.com", now), HostReadiness::Busy);

        throttle.release("a.com", true);
        assert_eq!(throttle.readiness("a.com", now), HostReadiness::Ready);
    }

    #[test]
    fn test_rate_limited_host_waits() {
        let mut throttle = HostThrottle::new(Duration::ZERO, None);
        let now = Instant::now();
        throttle.mark_rate_limited("a.com", Duration::from_secs(3), now);

        assert_eq!(
            throttle.readiness("a.com", now),
            HostReadiness::WaitUntil(now + Duration::from_secs(3))
        );
        assert_eq!(
            throttle.readiness("a.com", now + Duration::from_secs(3)),
            HostReadiness::Ready
        );
    }

    #[test]
    fn test_unbounded_cooldown_is_clamped() {
        let mut throttle = HostThrottle::new(Duration::ZERO, None);
        let now = Instant::now();
        throttle.mark_rate_limited("a.com", Duration::from_secs(u64::MAX), now);

        assert_eq!(
            throttle.readiness("a.com", now),
            HostReadiness::WaitUntil(now + MAX_HOST_WAIT)
        );
    }

    #[test]
    fn test_crawl_delay_raises_spacing() {
        let mut throttle = HostThrottle::new(Duration::from_millis(100), None);
        let now = Instant::now();
        throttle.set_crawl_delay("a.com", Some(SECOND));
        started(&mut throttle, "a.com", now);

        assert_eq!(
            throttle.readiness("a.com", now + Duration::from_millis(500)),
            HostReadiness::WaitUntil(now + SECOND)
        );
    }
}
