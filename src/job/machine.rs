//! Job state machine
//!
//! ```text
//! created ──start──▶ running ──drained──▶ completed
//!    │                │  ▲
//!    │              pause│resume
//!    │                ▼  │
//!    └──cancel──▶ cancelled ◀──cancel── paused
//!                     running ──systemic failure──▶ failed
//! ```
//!
//! A running job has a worker pool and a supervisor task. Pause and cancel
//! fire the run's stop token and wait for the supervisor to publish the
//! settled status; the supervisor writes the checkpoint before publishing.

use crate::config::JobConfig;
use crate::engine::Services;
use crate::frontier::{Candidate, Frontier, FrontierLimits, FrontierStats};
use crate::job::{CounterSnapshot, HealthPolicy, JobCounters, JobError, JobId};
use crate::sink::ResultSinkAdapter;
use crate::state::{HostThrottle, JobStatus};
use crate::storage::CheckpointRecord;
use crate::url::{Scope, UrlKey};
use crate::worker::{spawn_workers, WorkerContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a cancel treats fetches already in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelMode {
    /// Let in-flight fetches finish
    #[default]
    Graceful,
    /// Abort in-flight fetches
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopIntent {
    Pause,
    Cancel,
}

/// Cancellation handles for one run of the worker pool
#[derive(Debug, Clone)]
struct RunHandles {
    stop: CancellationToken,
    abort: CancellationToken,
    intent: Option<StopIntent>,
}

impl RunHandles {
    fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            intent: None,
        }
    }
}

struct Control {
    status: JobStatus,
    run: Option<RunHandles>,
    failure: Option<String>,
    updated_at: DateTime<Utc>,
}

/// Point-in-time view of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub counters: CounterSnapshot,
    pub frontier: FrontierStats,
    pub failure: Option<String>,
    pub config_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// State shared between a job and its workers
pub(crate) struct JobShared {
    pub id: JobId,
    pub config: JobConfig,
    pub frontier: Frontier,
    pub counters: Arc<JobCounters>,
    pub health: HealthPolicy,
    pub services: Arc<Services>,
    /// First systemic failure of the current run
    pub systemic: Mutex<Option<String>>,
    /// Workers ask the supervisor for a periodic checkpoint
    pub checkpoint_due: Notify,
}

impl JobShared {
    /// Records a systemic failure; the first reason wins
    pub fn record_failure(&self, reason: String) {
        let mut systemic = self.systemic.lock().unwrap_or_else(|e| e.into_inner());
        if systemic.is_none() {
            error!("Job {} failing: {}", self.id, reason);
            *systemic = Some(reason);
        }
    }

    fn failure(&self) -> Option<String> {
        self.systemic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct Job {
    shared: Arc<JobShared>,
    seeds: Vec<UrlKey>,
    config_hash: Option<String>,
    created_at: DateTime<Utc>,
    control: Mutex<Control>,
    status_tx: watch::Sender<JobStatus>,
    /// Serializes checkpoint writes so a later save never lands first
    persisting: tokio::sync::Mutex<()>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        config: JobConfig,
        seeds: Vec<UrlKey>,
        services: Arc<Services>,
        config_hash: Option<String>,
    ) -> Self {
        let frontier = Frontier::new(Scope::new(&config, &seeds), config.max_attempts)
            .with_politeness(HostThrottle::from_config(&config))
            .with_limits(FrontierLimits::from_config(&config));
        let now = Utc::now();
        Self::assemble(
            id,
            config,
            seeds,
            frontier,
            JobCounters::new(),
            services,
            config_hash,
            JobStatus::Created,
            None,
            now,
            now,
        )
    }

    /// Rebuilds a job from its checkpoint
    ///
    /// A job checkpointed while running was interrupted and comes back paused.
    pub(crate) fn from_checkpoint(record: CheckpointRecord, services: Arc<Services>) -> Self {
        let status = match record.status {
            JobStatus::Running => JobStatus::Paused,
            other => other,
        };
        let scope = Scope::new(&record.config, &record.seeds);
        let frontier = Frontier::restore(scope, record.config.max_attempts, record.frontier)
            .with_politeness(HostThrottle::from_config(&record.config))
            .with_limits(FrontierLimits::from_config(&record.config));
        if status.is_terminal() {
            frontier.close();
        }

        Self::assemble(
            record.job_id,
            record.config,
            record.seeds,
            frontier,
            JobCounters::from_snapshot(record.counters),
            services,
            record.config_hash,
            status,
            record.failure,
            record.created_at,
            record.updated_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        id: JobId,
        config: JobConfig,
        seeds: Vec<UrlKey>,
        frontier: Frontier,
        counters: JobCounters,
        services: Arc<Services>,
        config_hash: Option<String>,
        status: JobStatus,
        failure: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let shared = JobShared {
            id,
            health: HealthPolicy::from_config(&config),
            config,
            frontier,
            counters: Arc::new(counters),
            services,
            systemic: Mutex::new(None),
            checkpoint_due: Notify::new(),
        };
        let (status_tx, _) = watch::channel(status);

        Self {
            shared: Arc::new(shared),
            seeds,
            config_hash,
            created_at,
            control: Mutex::new(Control {
                status,
                run: None,
                failure,
                updated_at,
            }),
            status_tx,
            persisting: tokio::sync::Mutex::new(()),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn config(&self) -> &JobConfig {
        &self.shared.config
    }

    pub fn config_hash(&self) -> Option<&str> {
        self.config_hash.as_deref()
    }

    pub fn status(&self) -> JobStatus {
        self.control().status
    }

    /// Receives every published status change
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let (status, failure, updated_at) = {
            let control = self.control();
            (control.status, control.failure.clone(), control.updated_at)
        };
        JobSnapshot {
            id: self.id(),
            status,
            counters: self.shared.counters.snapshot(),
            frontier: self.shared.frontier.stats(),
            failure,
            config_hash: self.config_hash.clone(),
            created_at: self.created_at,
            updated_at,
        }
    }

    /// Moves a created or paused job to running and spawns its workers
    pub(crate) fn start(self: &Arc<Self>) -> Result<(), JobError> {
        let handles = {
            let mut control = self.control();
            let from = control.status;
            if !from.can_transition(JobStatus::Running) {
                return Err(JobError::InvalidTransition {
                    from,
                    to: JobStatus::Running,
                });
            }
            let handles = RunHandles::new();
            control.status = JobStatus::Running;
            control.run = Some(handles.clone());
            control.failure = None;
            control.updated_at = Utc::now();
            self.status_tx.send_replace(JobStatus::Running);
            handles
        };

        let shared = &self.shared;
        *shared.systemic.lock().unwrap_or_else(|e| e.into_inner()) = None;

        // a resumed frontier already holds the seeds in its visited set
        if shared.frontier.stats().visited == 0 {
            for seed in &self.seeds {
                let admission = shared.frontier.enqueue(Candidate::seed(seed.clone()));
                shared.counters.record_admission(&admission);
            }
        }

        let sink = Arc::new(ResultSinkAdapter::spawn(
            Arc::clone(&shared.services.sink),
            Arc::clone(&shared.counters),
        ));
        let ctx = Arc::new(WorkerContext {
            job: Arc::clone(shared),
            sink: Arc::clone(&sink),
            stop: handles.stop.clone(),
            abort: handles.abort.clone(),
            started: Instant::now(),
        });
        let workers = spawn_workers(ctx, shared.config.workers);

        info!(
            "Job {} running with {} workers ({} pending)",
            self.id(),
            shared.config.workers,
            shared.frontier.stats().pending()
        );

        tokio::spawn(Arc::clone(self).supervise(workers, sink, handles.stop));
        Ok(())
    }

    /// Stops the workers and checkpoints; returns the settled status
    pub(crate) async fn pause(&self) -> Result<JobStatus, JobError> {
        let mut rx = self.status_tx.subscribe();
        {
            let mut control = self.control();
            if control.status != JobStatus::Running {
                return Err(JobError::InvalidTransition {
                    from: control.status,
                    to: JobStatus::Paused,
                });
            }
            if let Some(run) = control.run.as_mut() {
                if run.intent.is_none() {
                    run.intent = Some(StopIntent::Pause);
                }
                run.stop.cancel();
            }
        }

        info!("Pausing job {}", self.id());
        Ok(settled(&mut rx).await)
    }

    /// Cancels a non-terminal job; returns the settled status
    ///
    /// A job that fails while cancelling settles as failed.
    pub(crate) async fn cancel(&self, mode: CancelMode) -> Result<JobStatus, JobError> {
        let mut rx = self.status_tx.subscribe();

        loop {
            let running = {
                let mut control = self.control();
                match control.status {
                    JobStatus::Created | JobStatus::Paused => {
                        control.status = JobStatus::Cancelled;
                        control.updated_at = Utc::now();
                        self.status_tx.send_replace(JobStatus::Cancelled);
                        false
                    }
                    JobStatus::Running => {
                        if let Some(run) = control.run.as_mut() {
                            run.intent = Some(StopIntent::Cancel);
                            run.stop.cancel();
                            if mode == CancelMode::Immediate {
                                run.abort.cancel();
                            }
                        }
                        true
                    }
                    from => {
                        return Err(JobError::InvalidTransition {
                            from,
                            to: JobStatus::Cancelled,
                        })
                    }
                }
            };

            self.shared.frontier.close();
            if !running {
                info!("Job {} cancelled", self.id());
                self.persist().await;
                return Ok(JobStatus::Cancelled);
            }

            info!("Cancelling job {} ({:?})", self.id(), mode);
            let status = settled(&mut rx).await;
            // a pause that settled first leaves the job paused; cancel that
            if status != JobStatus::Paused {
                return Ok(status);
            }
        }
    }

    /// Waits until the job is not running
    pub(crate) async fn wait(&self) -> JobStatus {
        let mut rx = self.status_tx.subscribe();
        settled(&mut rx).await
    }

    /// Writes the current state to the checkpoint store
    pub(crate) async fn persist(&self) {
        let (status, failure) = {
            let control = self.control();
            (control.status, control.failure.clone())
        };
        self.persist_as(status, failure).await;
    }

    async fn persist_as(&self, status: JobStatus, failure: Option<String>) {
        let Some(store) = self.shared.services.store.clone() else {
            return;
        };

        let _guard = self.persisting.lock().await;
        let record = self.checkpoint_record(status, failure);
        let id = self.id();

        match tokio::task::spawn_blocking(move || store.save(&record)).await {
            Ok(Ok(())) => debug!("Checkpointed job {} as {}", id, status),
            Ok(Err(e)) => warn!("Failed to checkpoint job {}: {}", id, e),
            Err(e) => warn!("Checkpoint task for job {} failed: {}", id, e),
        }
    }

    fn checkpoint_record(&self, status: JobStatus, failure: Option<String>) -> CheckpointRecord {
        CheckpointRecord {
            job_id: self.id(),
            status,
            config: self.shared.config.clone(),
            config_hash: self.config_hash.clone(),
            seeds: self.seeds.clone(),
            counters: self.shared.counters.snapshot(),
            frontier: self.shared.frontier.checkpoint(),
            failure,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    async fn supervise(
        self: Arc<Self>,
        mut workers: JoinSet<()>,
        sink: Arc<ResultSinkAdapter>,
        stop: CancellationToken,
    ) {
        self.persist_as(JobStatus::Running, None).await;

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Err(e)) if e.is_panic() => {
                        self.shared.record_failure(format!("worker panicked: {}", e));
                        stop.cancel();
                    }
                    Some(_) => {}
                },
                _ = self.shared.checkpoint_due.notified() => {
                    self.persist_as(JobStatus::Running, None).await;
                }
            }
        }

        sink.shutdown().await;

        let (status, failure) = self.final_status();
        if status.is_terminal() {
            self.shared.frontier.close();
        }
        self.persist_as(status, failure.clone()).await;

        {
            let mut control = self.control();
            control.status = status;
            control.run = None;
            control.failure = failure;
            control.updated_at = Utc::now();
            self.status_tx.send_replace(status);
        }

        let counters = self.shared.counters.snapshot();
        info!(
            "Job {} {}: {} succeeded, {} failed, {} skipped, {} records",
            self.id(),
            status,
            counters.succeeded,
            counters.failed,
            counters.skipped,
            counters.records_emitted
        );
    }

    /// Status a finished run settles into, failure first
    fn final_status(&self) -> (JobStatus, Option<String>) {
        if let Some(reason) = self.shared.failure() {
            return (JobStatus::Failed, Some(reason));
        }

        let intent = self.control().run.as_ref().and_then(|run| run.intent);
        let status = match intent {
            Some(StopIntent::Cancel) => JobStatus::Cancelled,
            Some(StopIntent::Pause) => JobStatus::Paused,
            None if self.shared.frontier.is_drained() => JobStatus::Completed,
            None => {
                warn!("Job {} workers exited with work pending", self.id());
                JobStatus::Paused
            }
        };
        (status, None)
    }
}

async fn settled(rx: &mut watch::Receiver<JobStatus>) -> JobStatus {
    if let Ok(status) = rx.wait_for(|status| *status != JobStatus::Running).await {
        return *status;
    }
    let current = *rx.borrow();
    current
}
