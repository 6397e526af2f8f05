use crate::config::ProxyConfig;
use crate::proxy::record::{Availability, ProxyRecord};
use crate::proxy::{ProxyEndpoint, ProxyOutcome, ProxyStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What the caller is about to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireHint {
    /// Target host (with port when explicit)
    pub host: String,
    /// Maximum concurrent requests to this host across all proxies
    pub host_cap: Option<u32>,
}

impl AcquireHint {
    pub fn new(host: impl Into<String>, host_cap: Option<u32>) -> Self {
        Self {
            host: host.into(),
            host_cap,
        }
    }
}

/// Why no proxy could be handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// Proxying is configured but no endpoints remain
    Empty,
    /// Every usable proxy is at its concurrency or rate limit
    Saturated,
    AllQuarantined,
    /// The target host is at its concurrency cap
    HostSaturated,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "no proxies configured",
            Self::Saturated => "all proxies busy",
            Self::AllQuarantined => "all proxies quarantined",
            Self::HostSaturated => "host concurrency cap reached",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no proxy available after {waited:?}: {reason}")]
pub struct NoProxyAvailable {
    pub reason: Unavailable,
    pub waited: Duration,
}

#[derive(Debug)]
struct ProxySlot {
    endpoint: ProxyEndpoint,
    record: Mutex<ProxyRecord>,
}

impl ProxySlot {
    fn lock(&self) -> MutexGuard<'_, ProxyRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The right to send one request, optionally through a proxy
///
/// Must be handed back with [`ProxyPool::release`].
#[derive(Debug)]
pub struct ProxyLease {
    slot: Option<Arc<ProxySlot>>,
    host: String,
    acquired_at: Instant,
}

impl ProxyLease {
    /// `None` in direct mode
    pub fn endpoint(&self) -> Option<&ProxyEndpoint> {
        self.slot.as_ref().map(|slot| &slot.endpoint)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }
}

/// Process-wide set of outbound proxies shared by every job
///
/// Each proxy record has its own mutex; the host load map and the affinity
/// map have theirs. No two of them are held at once.
pub struct ProxyPool {
    config: ProxyConfig,
    direct: bool,
    slots: RwLock<Vec<Arc<ProxySlot>>>,
    host_load: Mutex<HashMap<String, u32>>,
    affinity: Mutex<HashMap<String, ProxyEndpoint>>,
    released: Notify,
}

impl ProxyPool {
    /// Builds a pool from configuration
    ///
    /// The pool runs in direct mode when there are no static endpoints and no
    /// proxy API to fetch them from. A pool backed only by an API starts empty
    /// and is filled by [`refresh_from_api`](crate::proxy::refresh_from_api).
    pub fn new(config: ProxyConfig) -> Self {
        let slots = config
            .endpoints
            .iter()
            .map(|endpoint| new_slot(ProxyEndpoint::new(endpoint.as_str())))
            .collect::<Vec<_>>();
        let direct = config.is_direct();

        if direct {
            info!("Proxy pool running in direct mode");
        } else {
            info!("Proxy pool loaded with {} endpoints", slots.len());
        }

        Self {
            config,
            direct,
            slots: RwLock::new(slots),
            host_load: Mutex::new(HashMap::new()),
            affinity: Mutex::new(HashMap::new()),
            released: Notify::new(),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// Where extra endpoints are fetched from, if anywhere
    pub fn api_url(&self) -> Option<&str> {
        self.config.api_url.as_deref()
    }

    pub fn len(&self) -> usize {
        self.slots_snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots_snapshot(&self) -> Vec<Arc<ProxySlot>> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn host_load(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.host_load.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn affinity(&self) -> MutexGuard<'_, HashMap<String, ProxyEndpoint>> {
        self.affinity.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits up to `acquire-wait` for a usable proxy
    ///
    /// # Arguments
    ///
    /// * `hint` - Target host and its concurrency cap
    ///
    /// # Returns
    ///
    /// A lease to hand back with [`release`](Self::release), or the reason
    /// none was available. `Empty` is returned at once; the other reasons only
    /// after the full wait.
    pub async fn acquire(&self, hint: &AcquireHint) -> Result<ProxyLease, NoProxyAvailable> {
        let started = Instant::now();
        let deadline = started + self.config.acquire_wait();

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let reason = match self.try_acquire(hint) {
                Ok(lease) => return Ok(lease),
                Err(reason) => reason,
            };

            let now = Instant::now();
            if reason == Unavailable::Empty || now >= deadline {
                debug!("No proxy for {}: {}", hint.host, reason);
                return Err(NoProxyAvailable {
                    reason,
                    waited: now.saturating_duration_since(started),
                });
            }

            let wake = self
                .next_state_change()
                .map_or(deadline, |at| at.min(deadline));

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Single non-blocking acquisition attempt
    pub fn try_acquire(&self, hint: &AcquireHint) -> Result<ProxyLease, Unavailable> {
        if !self.reserve_host(hint) {
            return Err(Unavailable::HostSaturated);
        }

        match self.select(&hint.host) {
            Ok(slot) => Ok(ProxyLease {
                slot,
                host: hint.host.clone(),
                acquired_at: Instant::now(),
            }),
            Err(reason) => {
                self.release_host(&hint.host);
                Err(reason)
            }
        }
    }

    fn reserve_host(&self, hint: &AcquireHint) -> bool {
        let mut load = self.host_load();
        let count = load.entry(hint.host.clone()).or_insert(0);
        if hint.host_cap.is_some_and(|cap| *count >= cap) {
            return false;
        }
        *count += 1;
        true
    }

    fn release_host(&self, host: &str) {
        let mut load = self.host_load();
        if let Some(count) = load.get_mut(host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                load.remove(host);
            }
        }
    }

    fn select(&self, host: &str) -> Result<Option<Arc<ProxySlot>>, Unavailable> {
        let slots = self.slots_snapshot();
        if slots.is_empty() {
            return if self.direct {
                Ok(None)
            } else {
                Err(Unavailable::Empty)
            };
        }

        let now = Instant::now();
        let preferred = if self.config.host_affinity {
            self.affinity().get(host).cloned()
        } else {
            None
        };

        let mut candidates: Vec<(f64, usize)> = Vec::new();
        let mut quarantined = 0;
        for (index, slot) in slots.iter().enumerate() {
            let mut record = slot.lock();
            match record.availability(now, &self.config) {
                Availability::Available => {
                    let mut score = record.score(now, self.config.selection);
                    if preferred.as_ref() == Some(&slot.endpoint) {
                        score += 1.0;
                    }
                    candidates.push((score, index));
                }
                Availability::Quarantined => quarantined += 1,
                Availability::Busy => {}
            }
        }

        // Highest score first; earlier endpoints win ties
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, index) in candidates {
            let slot = &slots[index];
            let mut record = slot.lock();
            // Another task may have taken the last slot since scoring
            if record.availability(now, &self.config) == Availability::Available {
                record.begin(now, &self.config);
                return Ok(Some(Arc::clone(slot)));
            }
        }

        if quarantined == slots.len() {
            Err(Unavailable::AllQuarantined)
        } else {
            Err(Unavailable::Saturated)
        }
    }

    /// Earliest quarantine expiry or rate window reopening
    fn next_state_change(&self) -> Option<Instant> {
        self.slots_snapshot()
            .iter()
            .filter_map(|slot| {
                let record = slot.lock();
                match (record.quarantined_until(), record.window_reopens_at(&self.config)) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            })
            .min()
    }

    /// Returns a lease and records how the request went
    ///
    /// # Arguments
    ///
    /// * `lease` - The lease from [`acquire`](Self::acquire)
    /// * `outcome` - Network failures and timeouts count toward quarantine;
    ///   any HTTP response is a success for the proxy
    pub fn release(&self, lease: ProxyLease, outcome: ProxyOutcome) {
        if let Some(slot) = &lease.slot {
            let quarantined = slot.lock().finish(outcome, Instant::now(), &self.config);
            if let Some(cooldown) = quarantined {
                warn!("Proxy {} quarantined for {:?}", slot.endpoint, cooldown);
            }

            if self.config.host_affinity && outcome == ProxyOutcome::Success {
                self.affinity()
                    .insert(lease.host.clone(), slot.endpoint.clone());
            }
        }

        self.release_host(&lease.host);
        self.released.notify_waiters();
    }

    /// Feeds an observed request latency into the proxy's latency average
    pub fn report(&self, endpoint: &ProxyEndpoint, latency: Duration) {
        if let Some(slot) = self.find(endpoint) {
            slot.lock().observe_latency(latency, self.config.health_decay);
        }
    }

    fn find(&self, endpoint: &ProxyEndpoint) -> Option<Arc<ProxySlot>> {
        self.slots_snapshot()
            .into_iter()
            .find(|slot| &slot.endpoint == endpoint)
    }

    /// True when proxies are configured and every one is quarantined
    pub fn is_all_quarantined(&self) -> bool {
        let now = Instant::now();
        let slots = self.slots_snapshot();
        !slots.is_empty() && slots.iter().all(|slot| slot.lock().is_quarantined(now))
    }

    /// Adds an endpoint; returns false if it is already present
    pub fn add(&self, endpoint: ProxyEndpoint) -> bool {
        let added = {
            let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
            if slots.iter().any(|slot| slot.endpoint == endpoint) {
                false
            } else {
                info!("Proxy {} added", endpoint);
                slots.push(new_slot(endpoint));
                true
            }
        };
        if added {
            self.released.notify_waiters();
        }
        added
    }

    /// Removes an endpoint; outstanding leases stay valid until released
    pub fn remove(&self, endpoint: &ProxyEndpoint) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|slot| &slot.endpoint != endpoint);
        let removed = slots.len() != before;
        if removed {
            info!("Proxy {} removed", endpoint);
        }
        removed
    }

    /// Clears quarantine for an endpoint
    pub fn reinstate(&self, endpoint: &ProxyEndpoint) -> bool {
        let Some(slot) = self.find(endpoint) else {
            return false;
        };
        slot.lock().reinstate();
        info!("Proxy {} reinstated", endpoint);
        self.released.notify_waiters();
        true
    }

    pub fn snapshot(&self) -> Vec<ProxyStatus> {
        let now = Instant::now();
        self.slots_snapshot()
            .iter()
            .map(|slot| slot.lock().status(now))
            .collect()
    }
}

fn new_slot(endpoint: ProxyEndpoint) -> Arc<ProxySlot> {
    Arc::new(ProxySlot {
        record: Mutex::new(ProxyRecord::new(endpoint.clone())),
        endpoint,
    })
}
