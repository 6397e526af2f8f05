//! Fetch workers
//!
//! Each worker loops: dequeue, robots check, session lookup, proxy
//! acquisition, fetch, classify. Per-URL failures become outcomes and
//! counters; only systemic failures stop the run.
//!
//! Host politeness lives in the frontier: an item is only dequeued once its
//! host may take a request, and the worker reports the moment the request
//! actually goes out. An item handed back unstarted because the run is
//! stopping does not count as an attempt.

mod pool;

pub(crate) use pool::spawn_workers;

use crate::fetch::{fetch_with_lease, FetchError, FetchResponse};
use crate::frontier::{Dequeued, FrontierItem, Requeued};
use crate::job::{FetchOutcome, JobShared, OutcomeEvent, OutcomeStatus, ResponseMeta};
use crate::parse::ParseError;
use crate::proxy::{AcquireHint, NoProxyAvailable, ProxyLease, Unavailable};
use crate::sink::ResultSinkAdapter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Outcomes between progress log lines
const PROGRESS_EVERY: u64 = 10;

/// Everything one run's workers share
pub(crate) struct WorkerContext {
    pub job: Arc<JobShared>,
    pub sink: Arc<ResultSinkAdapter>,
    /// Fired by pause, cancel and systemic failure
    pub stop: CancellationToken,
    /// Fired by an immediate cancel; aborts in-flight fetches
    pub abort: CancellationToken,
    pub started: Instant,
}

impl WorkerContext {
    fn fail(&self, reason: String) {
        self.job.record_failure(reason);
        self.stop.cancel();
    }
}

pub(crate) async fn run_worker(ctx: Arc<WorkerContext>, worker_id: usize) {
    trace!("Worker {} started for job {}", worker_id, ctx.job.id);

    loop {
        if ctx.stop.is_cancelled() {
            break;
        }
        let item = match ctx.job.frontier.dequeue(&ctx.stop).await {
            Dequeued::Item(item) => item,
            Dequeued::Closed | Dequeued::Stopped => break,
        };
        if ctx.stop.is_cancelled() {
            ctx.job.frontier.defer(item, Duration::ZERO);
            break;
        }
        process(&ctx, item).await;
    }

    trace!("Worker {} exiting", worker_id);
}

async fn process(ctx: &WorkerContext, item: FrontierItem) {
    let job = &ctx.job;
    let config = &job.config;
    let services = &job.services;
    let started = Instant::now();

    if config.respect_robots {
        let decision = services.robots.check(&item.key, config.robots_default).await;
        if !decision.allowed {
            finish(ctx, item, OutcomeStatus::BlockedByRobots, None, started);
            return;
        }
        job.frontier.set_crawl_delay(&item.key, decision.crawl_delay);

        if ctx.stop.is_cancelled() {
            job.frontier.defer(item, Duration::ZERO);
            return;
        }
    }

    let session = match services.sessions.get_session(item.key.host()).await {
        Ok(session) => session,
        Err(e) => {
            warn!("No session for {}: {}", item.key.host(), e);
            None
        }
    };
    if session.is_none() && config.auth_required {
        finish(ctx, item, OutcomeStatus::AuthUnavailable, None, started);
        return;
    }

    let hint = AcquireHint::new(item.key.authority(), config.per_host_concurrency);
    let lease = match wait_for_lease(ctx, &hint).await {
        LeaseWait::Leased(lease) => lease,
        LeaseWait::Stopped => {
            job.frontier.defer(item, Duration::ZERO);
            return;
        }
        LeaseWait::Unavailable(e) => {
            debug!("No proxy for {}: {}", item.key, e);
            let exhausted = matches!(e.reason, Unavailable::AllQuarantined | Unavailable::Empty);
            if exhausted && config.fail_when_proxies_exhausted && !services.proxies.is_direct() {
                ctx.fail(format!("no usable proxies: {}", e.reason));
            }
            retry(ctx, item, OutcomeStatus::ProxyExhausted, None, None, started);
            return;
        }
    };

    job.frontier.start_request(&item.key);
    let result = fetch_with_lease(
        services.fetcher.as_ref(),
        &services.proxies,
        lease,
        item.key.url(),
        session.as_ref(),
        config.request_timeout(),
        Some(&ctx.abort),
    )
    .await;

    match result {
        Err(FetchError::Aborted) => {
            debug!("Fetch of {} aborted", item.key);
            job.frontier.defer(item, Duration::ZERO);
        }
        Err(e) => {
            debug!("Fetch of {} failed: {}", item.key, e);
            record_attempt(ctx, false, true);
            let status = match e {
                FetchError::Timeout => OutcomeStatus::Timeout,
                _ => OutcomeStatus::NetworkError,
            };
            retry(ctx, item, status, None, None, started);
        }
        Ok(response) => classify(ctx, item, response, started),
    }
}

enum LeaseWait {
    Leased(ProxyLease),
    Stopped,
    /// No proxy can serve the request; waiting longer will not help
    Unavailable(NoProxyAvailable),
}

/// Acquires a lease, waiting out busy proxies and host caps
///
/// The item keeps its place as the host's next request while it waits, so
/// saturation neither consumes an attempt nor sends the item back through
/// the frontier.
async fn wait_for_lease(ctx: &WorkerContext, hint: &AcquireHint) -> LeaseWait {
    let proxies = &ctx.job.services.proxies;
    loop {
        let result = tokio::select! {
            result = proxies.acquire(hint) => result,
            _ = ctx.stop.cancelled() => return LeaseWait::Stopped,
        };

        match result {
            Ok(lease) => return LeaseWait::Leased(lease),
            Err(e) if matches!(e.reason, Unavailable::HostSaturated | Unavailable::Saturated) => {
                trace!("Waiting for a proxy for {}: {}", hint.host, e);
                if e.waited.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(ctx.job.config.retry_delay(0)) => {}
                        _ = ctx.stop.cancelled() => return LeaseWait::Stopped,
                    }
                }
            }
            Err(e) => return LeaseWait::Unavailable(e),
        }
    }
}

fn classify(ctx: &WorkerContext, item: FrontierItem, response: FetchResponse, started: Instant) {
    let job = &ctx.job;
    let meta = ResponseMeta::from(&response);

    match response.status {
        200..=299 => {
            record_attempt(ctx, true, false);
            handle_page(ctx, item, response, meta, started);
        }
        429 | 503 => {
            record_attempt(ctx, true, true);
            let retry_after = response.retry_after();
            let cooldown = retry_after
                .unwrap_or_else(|| job.config.retry_delay(item.attempts))
                .min(job.config.retry_max_delay());
            job.frontier.mark_rate_limited(&item.key, cooldown);
            debug!("{} throttled us (HTTP {})", item.key.authority(), response.status);
            retry(
                ctx,
                item,
                OutcomeStatus::HttpError(meta.status),
                Some(meta),
                retry_after,
                started,
            );
        }
        500..=599 => {
            record_attempt(ctx, true, true);
            retry(
                ctx,
                item,
                OutcomeStatus::HttpError(meta.status),
                Some(meta),
                None,
                started,
            );
        }
        status => {
            record_attempt(ctx, true, false);
            finish(ctx, item, OutcomeStatus::HttpError(status), Some(meta), started);
        }
    }
}

fn handle_page(
    ctx: &WorkerContext,
    item: FrontierItem,
    response: FetchResponse,
    meta: ResponseMeta,
    started: Instant,
) {
    let job = &ctx.job;
    match job.services.parser.parse(&response, &item.key) {
        Ok(page) => {
            let records = page.records.len();
            for record in page.records {
                ctx.sink.emit(record);
            }
            // links go in before the item completes so the frontier never
            // looks drained in between
            let links = ctx.sink.admit_links(&job.frontier, &item, &page.links);
            debug!(
                "Parsed {}: {} records, {} new links ({} duplicate, {} filtered)",
                item.key, records, links.admitted, links.duplicates, links.filtered
            );
            finish(ctx, item, OutcomeStatus::Success, Some(meta), started);
        }
        Err(ParseError::UnsupportedContent(content_type)) => {
            debug!("Skipping {}: {}", item.key, content_type);
            finish(ctx, item, OutcomeStatus::UnsupportedContent, Some(meta), started);
        }
        Err(e) => {
            warn!("Failed to parse {}: {}", item.key, e);
            finish(ctx, item, OutcomeStatus::ParseError, Some(meta), started);
        }
    }
}

fn record_attempt(ctx: &WorkerContext, responded: bool, transient_failure: bool) {
    let counters = ctx.job.counters.record_attempt(responded, transient_failure);
    if let Some(reason) = ctx.job.health.evaluate(&counters) {
        ctx.fail(reason);
    }
}

/// Requeues with backoff, or finishes the item once its retries are spent
fn retry(
    ctx: &WorkerContext,
    item: FrontierItem,
    status: OutcomeStatus,
    meta: Option<ResponseMeta>,
    retry_after: Option<Duration>,
    started: Instant,
) {
    let job = &ctx.job;
    let backoff = job.config.retry_delay(item.attempts);
    let delay = retry_after.map_or(backoff, |wait| wait.min(job.config.retry_max_delay()));
    let key = item.key.clone();

    match job.frontier.requeue(item, delay) {
        Requeued::Scheduled { attempts, .. } => {
            job.counters.record_retry();
            debug!("Retrying {} in {:?} after {} (retry {})", key, delay, status, attempts);
        }
        Requeued::Exhausted(item) => {
            let tries = item.attempts;
            conclude(ctx, item, status, meta, started, tries);
        }
    }
}

/// Terminal outcome for an item that is still in flight
fn finish(
    ctx: &WorkerContext,
    item: FrontierItem,
    status: OutcomeStatus,
    meta: Option<ResponseMeta>,
    started: Instant,
) {
    let tries = item.attempts + 1;
    conclude(ctx, item, status, meta, started, tries);
}

fn conclude(
    ctx: &WorkerContext,
    item: FrontierItem,
    status: OutcomeStatus,
    meta: Option<ResponseMeta>,
    started: Instant,
    attempts: u32,
) {
    let job = &ctx.job;
    let counters = job.counters.record_outcome(status);
    job.frontier.complete(&item.key);

    if status.is_failure() {
        debug!("{} failed: {} after {} attempts", item.key, status, attempts);
    } else {
        trace!("{}: {}", item.key, status);
    }

    let outcome = FetchOutcome {
        key: item.key,
        status,
        meta,
        elapsed: started.elapsed(),
        attempts,
    };
    // no subscribers is fine
    let _ = job.services.outcomes.send(OutcomeEvent {
        job_id: job.id,
        outcome,
    });

    let done = counters.terminal();
    if done % PROGRESS_EVERY == 0 {
        let elapsed = ctx.started.elapsed().as_secs_f64().max(0.001);
        let stats = job.frontier.stats();
        info!(
            "Job {}: {} done, {} pending, {} in flight, {:.2} pages/sec",
            job.id,
            done,
            stats.pending(),
            stats.in_flight,
            counters.fetched as f64 / elapsed
        );
    }

    let every = job.config.checkpoint_every;
    if every > 0 && done % every == 0 {
        job.checkpoint_due.notify_one();
    }
}
