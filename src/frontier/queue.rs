use crate::config::JobConfig;
use crate::frontier::item::{
    Candidate, Delayed, FrontierCheckpoint, FrontierItem, PendingItem, Ready,
};
use crate::state::{HostReadiness, HostThrottle};
use crate::url::{FilterReason, Scope, UrlKey};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Result of offering a candidate to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Duplicate,
    Filtered(FilterReason),
    Closed,
}

/// Result of waiting for work
#[derive(Debug)]
pub enum Dequeued {
    Item(FrontierItem),
    /// Closed explicitly, or drained: nothing pending and nothing in flight
    Closed,
    /// The caller's stop token fired while waiting
    Stopped,
}

/// Result of handing a failed item back for another attempt
#[derive(Debug)]
pub enum Requeued {
    Scheduled { attempts: u32, not_before: Instant },
    /// Retry budget spent; the item is terminal
    Exhausted(FrontierItem),
}

/// Caps on how much a job admits; zero means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontierLimits {
    /// URLs admitted over the job's lifetime
    pub max_pages: u64,
    /// Distinct hosts among admitted URLs
    pub max_domains: u64,
}

impl FrontierLimits {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_domains: config.max_domains,
        }
    }
}

/// Point-in-time queue sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FrontierStats {
    pub ready: usize,
    pub delayed: usize,
    /// Held back until their host may take another request
    pub parked: usize,
    pub in_flight: usize,
    pub visited: usize,
    /// Items handed to workers since this frontier was built
    pub dispatched: u64,
    pub closed: bool,
}

impl FrontierStats {
    pub fn pending(&self) -> usize {
        self.ready + self.delayed + self.parked
    }
}

/// An item handed to a worker
struct InFlight {
    item: FrontierItem,
    /// Its request has been sent
    started: bool,
}

struct State {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Delayed>,
    /// Ready items whose host is not, keyed by host authority
    parked: HashMap<String, BinaryHeap<Ready>>,
    /// When a host with parked items may become ready again
    wakeups: BinaryHeap<Reverse<(Instant, String)>>,
    in_flight: HashMap<UrlKey, InFlight>,
    visited: HashSet<UrlKey>,
    domains: HashSet<String>,
    hosts: HostThrottle,
    next_seq: u64,
    dispatched: u64,
    closed: bool,
}

impl State {
    fn empty() -> Self {
        Self {
            ready: BinaryHeap::new(),
            delayed: BinaryHeap::new(),
            parked: HashMap::new(),
            wakeups: BinaryHeap::new(),
            in_flight: HashMap::new(),
            visited: HashSet::new(),
            domains: HashSet::new(),
            hosts: HostThrottle::default(),
            next_seq: 0,
            dispatched: 0,
            closed: false,
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn schedule(&mut self, item: FrontierItem, now: Instant) {
        if item.not_before <= now {
            self.ready.push(Ready(item));
        } else {
            self.delayed.push(Delayed(item));
        }
    }

    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .is_some_and(|top| top.0.not_before <= now)
        {
            if let Some(Delayed(item)) = self.delayed.pop() {
                self.ready.push(Ready(item));
            }
        }

        while self.wakeups.peek().is_some_and(|top| top.0 .0 <= now) {
            if let Some(Reverse((_, host))) = self.wakeups.pop() {
                self.wake_host(&host, now);
            }
        }
    }

    /// Moves the host's best parked item back to the ready heap when the host
    /// can take it, or books a wakeup for when it can
    fn wake_host(&mut self, host: &str, now: Instant) {
        if !self.parked.contains_key(host) {
            return;
        }

        match self.hosts.readiness(host, now) {
            HostReadiness::Ready => {
                if let Some(queue) = self.parked.get_mut(host) {
                    if let Some(next) = queue.pop() {
                        self.ready.push(next);
                    }
                    if queue.is_empty() {
                        self.parked.remove(host);
                    }
                }
            }
            HostReadiness::WaitUntil(at) => self.wakeups.push(Reverse((at, host.to_string()))),
            // Whatever holds the host wakes it when it starts or finishes
            HostReadiness::Busy => {}
        }
    }

    /// Pops the best ready item whose host can take a request now
    ///
    /// Items whose host cannot are parked rather than handed out.
    fn next_dispatchable(&mut self, now: Instant) -> Option<FrontierItem> {
        while let Some(Ready(item)) = self.ready.pop() {
            let host = item.key.authority();
            match self.hosts.readiness(&host, now) {
                HostReadiness::Ready => {
                    self.hosts.dispatch(&host);
                    self.dispatched += 1;
                    self.in_flight.insert(
                        item.key.clone(),
                        InFlight {
                            item: item.clone(),
                            started: false,
                        },
                    );
                    return Some(item);
                }
                readiness => {
                    if let HostReadiness::WaitUntil(at) = readiness {
                        self.wakeups.push(Reverse((at, host.clone())));
                    }
                    trace!("Parked {} until its host frees up", item.key);
                    self.parked.entry(host).or_default().push(Ready(item));
                }
            }
        }
        None
    }

    /// Drops the in-flight entry for `key` and frees its host
    fn release(&mut self, key: &UrlKey, now: Instant) {
        if let Some(entry) = self.in_flight.remove(key) {
            let host = key.authority();
            self.hosts.release(&host, entry.started);
            self.wake_host(&host, now);
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let delayed = self.delayed.peek().map(|top| top.0.not_before);
        let wakeup = self.wakeups.peek().map(|top| top.0 .0);
        match (delayed, wakeup) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn parked_len(&self) -> usize {
        self.parked.values().map(BinaryHeap::len).sum()
    }

    fn is_drained(&self) -> bool {
        self.ready.is_empty()
            && self.delayed.is_empty()
            && self.parked.is_empty()
            && self.in_flight.is_empty()
    }
}

/// Per-job work queue with at-most-once admission
///
/// The visited set check and the queue insertion happen under one lock, so
/// concurrent discoverers of the same URL see exactly one `Admitted`.
///
/// The frontier also owns per-host politeness. An item is only handed out
/// when its host can take a request: hosts still inside their spacing window,
/// cooling down after a 429, or at their concurrency cap keep their items
/// parked here instead of bouncing them through workers.
pub struct Frontier {
    state: Mutex<State>,
    changed: Notify,
    scope: Scope,
    limits: FrontierLimits,
    max_attempts: u32,
}

impl Frontier {
    /// Creates an empty frontier with no politeness and no admission caps
    ///
    /// # Arguments
    ///
    /// * `scope` - Decides which URLs may enter
    /// * `max_attempts` - Retries allowed per item after its first attempt
    pub fn new(scope: Scope, max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(State::empty()),
            changed: Notify::new(),
            scope,
            limits: FrontierLimits::default(),
            max_attempts,
        }
    }

    /// Rebuilds a frontier from a checkpoint
    ///
    /// Pending keys are treated as visited so rediscovering them is a
    /// duplicate, never a second admission.
    pub fn restore(scope: Scope, max_attempts: u32, checkpoint: FrontierCheckpoint) -> Self {
        let now = Instant::now();
        let mut state = State::empty();
        state.visited.extend(checkpoint.visited);

        for pending in checkpoint.pending {
            state.visited.insert(pending.key.clone());
            let seq = state.take_seq();
            let not_before = now
                .checked_add(Duration::from_millis(pending.delay_ms))
                .unwrap_or(now);
            let item = FrontierItem {
                key: pending.key,
                depth: pending.depth,
                priority: pending.priority,
                discovered_from: pending.discovered_from,
                not_before,
                attempts: pending.attempts,
                seq,
            };
            state.schedule(item, now);
        }

        let domains: HashSet<String> = state
            .visited
            .iter()
            .map(|key| key.host().to_string())
            .collect();
        state.domains = domains;

        debug!(
            "Restored frontier: {} pending, {} visited",
            state.ready.len() + state.delayed.len(),
            state.visited.len()
        );

        Self {
            state: Mutex::new(state),
            changed: Notify::new(),
            scope,
            limits: FrontierLimits::default(),
            max_attempts,
        }
    }

    /// Spaces requests per host and caps per-host concurrency with `hosts`
    pub fn with_politeness(self, hosts: HostThrottle) -> Self {
        self.lock().hosts = hosts;
        self
    }

    pub fn with_limits(mut self, limits: FrontierLimits) -> Self {
        self.limits = limits;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Offers a URL to the queue
    ///
    /// Scope filters run first, so filtered URLs never enter the visited set.
    /// The page and domain caps are checked under the lock after the
    /// duplicate check, so rediscovering an admitted URL stays a duplicate.
    ///
    /// # Arguments
    ///
    /// * `candidate` - The URL with its depth, priority and parent
    ///
    /// # Returns
    ///
    /// `Admitted` exactly once per key over the frontier's lifetime.
    pub fn enqueue(&self, candidate: Candidate) -> Admission {
        if let Err(reason) = self.scope.check(&candidate.key, candidate.depth) {
            trace!("Filtered {} ({})", candidate.key, reason);
            return Admission::Filtered(reason);
        }

        {
            let mut state = self.lock();
            if state.closed {
                return Admission::Closed;
            }
            if state.visited.contains(&candidate.key) {
                return Admission::Duplicate;
            }
            if let Err(reason) = self.check_limits(&state, &candidate.key) {
                trace!("Filtered {} ({})", candidate.key, reason);
                return Admission::Filtered(reason);
            }

            state.visited.insert(candidate.key.clone());
            if !state.domains.contains(candidate.key.host()) {
                state.domains.insert(candidate.key.host().to_string());
            }
            let seq = state.take_seq();
            let item = FrontierItem::new(candidate, seq, Instant::now());
            trace!("Admitted {} at depth {}", item.key, item.depth);
            state.ready.push(Ready(item));
        }

        self.changed.notify_waiters();
        Admission::Admitted
    }

    fn check_limits(&self, state: &State, key: &UrlKey) -> Result<(), FilterReason> {
        let FrontierLimits {
            max_pages,
            max_domains,
        } = self.limits;

        if max_pages > 0 && state.visited.len() as u64 >= max_pages {
            return Err(FilterReason::PageLimit);
        }
        if max_domains > 0
            && !state.domains.contains(key.host())
            && state.domains.len() as u64 >= max_domains
        {
            return Err(FilterReason::DomainLimit);
        }
        Ok(())
    }

    /// Waits for the next item whose host can take a request
    ///
    /// The item's host is held for it until [`start_request`](Self::start_request),
    /// or until the item is completed, requeued or deferred.
    ///
    /// # Arguments
    ///
    /// * `stop` - Interrupts the wait
    ///
    /// # Returns
    ///
    /// `Closed` once the frontier is closed; an empty frontier with nothing
    /// in flight closes itself.
    pub async fn dequeue(&self, stop: &CancellationToken) -> Dequeued {
        loop {
            if stop.is_cancelled() {
                return Dequeued::Stopped;
            }

            // Register interest before inspecting state so a wakeup between
            // the check and the wait is not lost.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.lock();
                if state.closed {
                    return Dequeued::Closed;
                }

                let now = Instant::now();
                state.promote_due(now);

                if let Some(item) = state.next_dispatchable(now) {
                    return Dequeued::Item(item);
                }

                if state.is_drained() {
                    state.closed = true;
                    debug!("Frontier drained after {} URLs", state.visited.len());
                    self.changed.notify_waiters();
                    return Dequeued::Closed;
                }

                state.next_wake()
            };

            match wake_at {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = stop.cancelled() => return Dequeued::Stopped,
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = stop.cancelled() => return Dequeued::Stopped,
                    }
                }
            }
        }
    }

    /// Records that the request for a dequeued item is going out now
    ///
    /// Spacing for the item's host is measured from this call.
    pub fn start_request(&self, key: &UrlKey) {
        {
            let mut state = self.lock();
            let now = Instant::now();
            let host = key.authority();
            match state.in_flight.get_mut(key) {
                Some(entry) if !entry.started => entry.started = true,
                _ => return,
            }
            state.hosts.start_request(&host, now);
            state.wake_host(&host, now);
        }
        self.changed.notify_waiters();
    }

    /// Applies a host's robots crawl-delay to its spacing
    pub fn set_crawl_delay(&self, key: &UrlKey, crawl_delay: Option<Duration>) {
        self.lock()
            .hosts
            .set_crawl_delay(&key.authority(), crawl_delay);
    }

    /// Holds back every item of `key`'s host for `cooldown`
    pub fn mark_rate_limited(&self, key: &UrlKey, cooldown: Duration) {
        self.lock()
            .hosts
            .mark_rate_limited(&key.authority(), cooldown, Instant::now());
    }

    /// Schedules another attempt after `delay`, consuming one attempt
    pub fn requeue(&self, mut item: FrontierItem, delay: Duration) -> Requeued {
        let result = {
            let mut state = self.lock();
            let now = Instant::now();
            state.release(&item.key, now);
            item.attempts += 1;

            if item.attempts > self.max_attempts {
                Requeued::Exhausted(item)
            } else {
                item.not_before = now.checked_add(delay).unwrap_or(now);
                let scheduled = Requeued::Scheduled {
                    attempts: item.attempts,
                    not_before: item.not_before,
                };
                state.schedule(item, now);
                scheduled
            }
        };

        self.changed.notify_waiters();
        result
    }

    /// Hands an in-flight item back without consuming an attempt
    ///
    /// Used when the item never reached a fetch, e.g. the run is stopping.
    pub fn defer(&self, mut item: FrontierItem, delay: Duration) {
        {
            let mut state = self.lock();
            let now = Instant::now();
            state.release(&item.key, now);
            item.not_before = now.checked_add(delay).unwrap_or(now);
            state.schedule(item, now);
        }
        self.changed.notify_waiters();
    }

    /// Marks a dequeued item as finished
    pub fn complete(&self, key: &UrlKey) {
        self.lock().release(key, Instant::now());
        self.changed.notify_waiters();
    }

    /// Closes the frontier; irreversible
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Nothing pending (ready, delayed or parked) and nothing in flight
    pub fn is_drained(&self) -> bool {
        self.lock().is_drained()
    }

    pub fn is_visited(&self, key: &UrlKey) -> bool {
        self.lock().visited.contains(key)
    }

    pub fn stats(&self) -> FrontierStats {
        let state = self.lock();
        FrontierStats {
            ready: state.ready.len(),
            delayed: state.delayed.len(),
            parked: state.parked_len(),
            in_flight: state.in_flight.len(),
            visited: state.visited.len(),
            dispatched: state.dispatched,
            closed: state.closed,
        }
    }

    /// Snapshot of pending work and the visited set
    ///
    /// In-flight items are recorded as pending so an interrupted run picks
    /// them up again.
    pub fn checkpoint(&self) -> FrontierCheckpoint {
        let state = self.lock();
        let now = Instant::now();

        let mut items: Vec<&FrontierItem> = state
            .ready
            .iter()
            .map(|r| &r.0)
            .chain(state.delayed.iter().map(|d| &d.0))
            .chain(state.parked.values().flat_map(|q| q.iter().map(|r| &r.0)))
            .chain(state.in_flight.values().map(|entry| &entry.item))
            .collect();
        items.sort_by_key(|item| item.seq);

        let pending = items
            .into_iter()
            .map(|item| PendingItem {
                key: item.key.clone(),
                depth: item.depth,
                priority: item.priority,
                discovered_from: item.discovered_from.clone(),
                delay_ms: item.not_before.saturating_duration_since(now).as_millis() as u64,
                attempts: item.attempts,
            })
            .collect();

        let mut visited: Vec<UrlKey> = state.visited.iter().cloned().collect();
        visited.sort();

        FrontierCheckpoint { pending, visited }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(path: &str) -> UrlKey {
        UrlKey::parse(&format!("https://example.com{}", path)).unwrap()
    }

    fn frontier(max_attempts: u32) -> Frontier {
        let config = JobConfig {
            max_depth: 3,
            ..JobConfig::default()
        };
        Frontier::new(Scope::new(&config, &[key("/")]), max_attempts)
    }

    fn polite(spacing_ms: u64) -> Frontier {
        let config = JobConfig {
            max_depth: 3,
            min_host_delay_ms: spacing_ms,
            ..JobConfig::default()
        };
        Frontier::new(Scope::new(&config, &[key("/")]), 0)
            .with_politeness(HostThrottle::from_config(&config))
    }

    fn open_scope(limits: FrontierLimits) -> Frontier {
        let config = JobConfig {
            same_domain_only: false,
            ..JobConfig::default()
        };
        Frontier::new(Scope::new(&config, &[key("/")]), 3).with_limits(limits)
    }

    async fn next(frontier: &Frontier) -> FrontierItem {
        match frontier.dequeue(&CancellationToken::new()).await {
            Dequeued::Item(item) => item,
            other => panic!("expected item, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let frontier = frontier(3);
        assert_eq!(frontier.enqueue(Candidate::seed(key("/a"))), Admission::Admitted);
        assert_eq!(frontier.enqueue(Candidate::seed(key("/a#x"))), Admission::Duplicate);
        assert_eq!(frontier.stats().ready, 1);
    }

    #[test]
    fn test_filtered_url_not_marked_visited() {
        let frontier = frontier(3);
        let deep = Candidate {
            key: key("/deep"),
            depth: 9,
            priority: 0,
            discovered_from: None,
        };
        assert_eq!(
            frontier.enqueue(deep),
            Admission::Filtered(FilterReason::DepthExceeded)
        );
        assert!(!frontier.is_visited(&key("/deep")));
        assert_eq!(frontier.enqueue(Candidate::seed(key("/deep"))), Admission::Admitted);
    }

    #[test]
    fn test_concurrent_enqueue_admits_each_key_once() {
        let frontier = Arc::new(frontier(3));
        let admitted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for i in 0..200 {
                        let candidate = Candidate::seed(key(&format!("/page/{}", i)));
                        if frontier.enqueue(candidate) == Admission::Admitted {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.into_inner(), 200);
        assert_eq!(frontier.stats().ready, 200);
        assert_eq!(frontier.stats().visited, 200);
    }

    #[tokio::test]
    async fn test_drained_frontier_closes_itself() {
        let frontier = frontier(3);
        frontier.enqueue(Candidate::seed(key("/")));

        let item = next(&frontier).await;
        assert!(!frontier.is_drained());
        frontier.complete(&item.key);

        assert!(matches!(
            frontier.dequeue(&CancellationToken::new()).await,
            Dequeued::Closed
        ));
        assert!(frontier.is_closed());
        assert_eq!(frontier.enqueue(Candidate::seed(key("/late"))), Admission::Closed);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_enqueue() {
        let frontier = Arc::new(frontier(3));
        frontier.enqueue(Candidate::seed(key("/")));
        let root = next(&frontier).await;

        let waiter = {
            let frontier = Arc::clone(&frontier);
            tokio::spawn(async move { next(&frontier).await.key })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        frontier.enqueue(Candidate::discovered(key("/child"), &root));
        frontier.complete(&root.key);

        assert_eq!(waiter.await.unwrap(), key("/child"));
    }

    #[tokio::test]
    async fn test_requeue_exhausts_after_max_attempts() {
        let frontier = frontier(2);
        frontier.enqueue(Candidate::seed(key("/flaky")));

        let mut dequeues = 0;
        loop {
            let item = next(&frontier).await;
            dequeues += 1;
            match frontier.requeue(item, Duration::ZERO) {
                Requeued::Scheduled { .. } => continue,
                Requeued::Exhausted(item) => {
                    assert_eq!(item.attempts, 3);
                    break;
                }
            }
        }

        assert_eq!(dequeues, 3);
        assert!(frontier.is_drained());
    }

    #[tokio::test]
    async fn test_defer_keeps_attempts_and_delays() {
        let frontier = frontier(3);
        frontier.enqueue(Candidate::seed(key("/slow")));

        let item = next(&frontier).await;
        frontier.defer(item, Duration::from_millis(40));
        assert_eq!(frontier.stats().delayed, 1);

        let started = Instant::now();
        let item = next(&frontier).await;
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(item.attempts, 0);
    }

    #[tokio::test]
    async fn test_stop_token_interrupts_wait() {
        let frontier = Arc::new(frontier(3));
        frontier.enqueue(Candidate::seed(key("/")));
        let _held = next(&frontier).await;

        let stop = CancellationToken::new();
        let waiter = {
            let frontier = Arc::clone(&frontier);
            let stop = stop.clone();
            tokio::spawn(async move { frontier.dequeue(&stop).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.cancel();
        assert!(matches!(waiter.await.unwrap(), Dequeued::Stopped));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let frontier = Arc::new(frontier(3));
        frontier.enqueue(Candidate::seed(key("/")));
        let _held = next(&frontier).await;

        let waiter = {
            let frontier = Arc::clone(&frontier);
            tokio::spawn(async move { frontier.dequeue(&CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        frontier.close();
        assert!(matches!(waiter.await.unwrap(), Dequeued::Closed));
    }

    #[tokio::test]
    async fn test_checkpoint_restore_preserves_work_and_visited() {
        let frontier = frontier(3);
        frontier.enqueue(Candidate::seed(key("/")));
        frontier.enqueue(Candidate::seed(key("/a")));
        frontier.enqueue(Candidate::seed(key("/b")));

        let root = next(&frontier).await;
        frontier.complete(&root.key);
        let a = next(&frontier).await;
        frontier.requeue(a, Duration::from_millis(10));

        let checkpoint = frontier.checkpoint();
        assert_eq!(checkpoint.visited.len(), 3);
        assert_eq!(checkpoint.pending.len(), 2);

        let config = JobConfig::default();
        let restored = Frontier::restore(Scope::new(&config, &[key("/")]), 3, checkpoint);

        assert_eq!(restored.enqueue(Candidate::seed(key("/"))), Admission::Duplicate);
        assert_eq!(restored.enqueue(Candidate::seed(key("/a"))), Admission::Duplicate);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let item = next(&restored).await;
            seen.push((item.key.path().to_string(), item.attempts));
            restored.complete(&item.key);
        }
        seen.sort();
        assert_eq!(seen, vec![("/a".to_string(), 1), ("/b".to_string(), 0)]);
    }

    #[tokio::test]
    async fn test_checkpoint_includes_in_flight() {
        let frontier = frontier(3);
        frontier.enqueue(Candidate::seed(key("/")));
        let _in_flight = next(&frontier).await;

        let checkpoint = frontier.checkpoint();
        assert_eq!(checkpoint.pending.len(), 1);
        assert_eq!(checkpoint.pending[0].key, key("/"));
    }

    #[tokio::test]
    async fn test_same_host_items_are_spaced_and_dispatched_once() {
        let frontier = polite(60);
        for i in 0..4 {
            frontier.enqueue(Candidate::seed(key(&format!("/p{}", i))));
        }

        let mut starts = Vec::new();
        for _ in 0..4 {
            let item = tokio::time::timeout(Duration::from_secs(2), next(&frontier))
                .await
                .expect("spaced item never became ready");
            frontier.start_request(&item.key);
            starts.push(Instant::now());
            frontier.complete(&item.key);
        }

        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(55));
        }
        let stats = frontier.stats();
        assert_eq!(stats.dispatched, 4);
        assert_eq!(stats.pending(), 0);
    }

    #[tokio::test]
    async fn test_unstarted_item_holds_its_host() {
        let frontier = polite(1_000);
        frontier.enqueue(Candidate::seed(key("/a")));
        frontier.enqueue(Candidate::seed(key("/b")));
        let other = UrlKey::parse("https://example.com:8443/c").unwrap();
        frontier.enqueue(Candidate::seed(other.clone()));

        let first = next(&frontier).await;
        // The second example.com item parks; the other authority is served
        let second = next(&frontier).await;
        assert_eq!(second.key, other);
        assert!(
            tokio::time::timeout(Duration::from_millis(40), next(&frontier))
                .await
                .is_err()
        );
        assert_eq!(frontier.stats().parked, 1);

        // Handing the first back unstarted frees the host at once
        frontier.defer(first, Duration::ZERO);
        let again = tokio::time::timeout(Duration::from_millis(200), next(&frontier))
            .await
            .expect("host stayed held after defer");
        assert!(again.key == key("/a") || again.key == key("/b"));
        assert_eq!(frontier.stats().dispatched, 3);
    }

    #[tokio::test]
    async fn test_rate_limited_host_keeps_items_parked() {
        let frontier = frontier(3);
        frontier.enqueue(Candidate::seed(key("/a")));
        frontier.enqueue(Candidate::seed(key("/b")));

        let a = next(&frontier).await;
        frontier.start_request(&a.key);
        frontier.mark_rate_limited(&a.key, Duration::from_millis(60));
        frontier.complete(&a.key);

        let started = Instant::now();
        let b = next(&frontier).await;
        assert_eq!(b.key, key("/b"));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(frontier.stats().dispatched, 2);
    }

    #[tokio::test]
    async fn test_checkpoint_includes_parked() {
        let frontier = polite(1_000);
        frontier.enqueue(Candidate::seed(key("/a")));
        frontier.enqueue(Candidate::seed(key("/b")));
        let _held = next(&frontier).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(20), next(&frontier))
                .await
                .is_err()
        );

        let checkpoint = frontier.checkpoint();
        assert_eq!(checkpoint.pending.len(), 2);
        assert!(!frontier.is_drained());
    }

    #[test]
    fn test_page_limit_filters_new_urls() {
        let frontier = open_scope(FrontierLimits {
            max_pages: 2,
            max_domains: 0,
        });
        assert_eq!(frontier.enqueue(Candidate::seed(key("/a"))), Admission::Admitted);
        assert_eq!(frontier.enqueue(Candidate::seed(key("/b"))), Admission::Admitted);
        assert_eq!(
            frontier.enqueue(Candidate::seed(key("/c"))),
            Admission::Filtered(FilterReason::PageLimit)
        );
        assert_eq!(frontier.enqueue(Candidate::seed(key("/a"))), Admission::Duplicate);
        assert!(!frontier.is_visited(&key("/c")));
    }

    #[test]
    fn test_domain_limit_filters_new_hosts() {
        let frontier = open_scope(FrontierLimits {
            max_pages: 0,
            max_domains: 2,
        });
        let url = |s: &str| UrlKey::parse(s).unwrap();

        assert_eq!(frontier.enqueue(Candidate::seed(key("/a"))), Admission::Admitted);
        assert_eq!(
            frontier.enqueue(Candidate::seed(url("https://other.com/"))),
            Admission::Admitted
        );
        assert_eq!(
            frontier.enqueue(Candidate::seed(url("https://third.com/"))),
            Admission::Filtered(FilterReason::DomainLimit)
        );
        // Known hosts keep admitting
        assert_eq!(
            frontier.enqueue(Candidate::seed(url("https://other.com/more"))),
            Admission::Admitted
        );
    }

    #[test]
    fn test_restored_frontier_keeps_domain_count() {
        let limits = FrontierLimits {
            max_pages: 0,
            max_domains: 1,
        };
        let frontier = open_scope(limits);
        frontier.enqueue(Candidate::seed(key("/a")));

        let config = JobConfig {
            same_domain_only: false,
            ..JobConfig::default()
        };
        let restored = Frontier::restore(
            Scope::new(&config, &[key("/")]),
            3,
            frontier.checkpoint(),
        )
        .with_limits(limits);

        assert_eq!(
            restored.enqueue(Candidate::seed(UrlKey::parse("https://other.com/").unwrap())),
            Admission::Filtered(FilterReason::DomainLimit)
        );
        assert_eq!(restored.enqueue(Candidate::seed(key("/b"))), Admission::Admitted);
    }
}
