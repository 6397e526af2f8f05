//! Engine: shared crawl services and the job control surface
//!
//! The engine owns the collaborators every job shares (proxy pool, robots
//! gate, fetcher, parser, session provider, record sink, checkpoint store)
//! and the table of loaded jobs. Jobs are addressed by [`JobId`].

use crate::config::{
    validate_job_config, validate_seeds, Config, JobConfig, ProxyConfig, RobotsConfig,
    UserAgentConfig,
};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::job::{CancelMode, Job, JobError, JobId, JobSnapshot, OutcomeEvent};
use crate::parse::{HtmlParser, Parser};
use crate::proxy::{refresh_from_api, ProxyPool};
use crate::robots::RobotsGate;
use crate::session::{NoSession, SessionProvider, StaticSessionProvider};
use crate::sink::{JsonLinesSink, MemorySink, RecordSink};
use crate::state::JobStatus;
use crate::storage::{CheckpointStore, JobSummary, SqliteCheckpointStore, StorageError};
use crate::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Buffered outcome events per subscriber before it starts lagging
const OUTCOME_BUFFER: usize = 1024;

const DEFAULT_ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);

/// Collaborators shared by every job of an engine
pub(crate) struct Services {
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn Parser>,
    pub sessions: Arc<dyn SessionProvider>,
    pub sink: Arc<dyn RecordSink>,
    pub proxies: Arc<ProxyPool>,
    pub robots: Arc<RobotsGate>,
    pub store: Option<Arc<dyn CheckpointStore>>,
    pub outcomes: broadcast::Sender<OutcomeEvent>,
}

#[derive(Default)]
pub struct EngineBuilder {
    user_agent: UserAgentConfig,
    proxy: ProxyConfig,
    robots: RobotsConfig,
    robots_timeout: Option<Duration>,
    fetcher: Option<Arc<dyn Fetcher>>,
    parser: Option<Arc<dyn Parser>>,
    sessions: Option<Arc<dyn SessionProvider>>,
    sink: Option<Arc<dyn RecordSink>>,
    store: Option<Arc<dyn CheckpointStore>>,
    config_hash: Option<String>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, user_agent: UserAgentConfig) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn proxy_config(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn robots_config(mut self, robots: RobotsConfig) -> Self {
        self.robots = robots;
        self
    }

    pub fn robots_timeout(mut self, timeout: Duration) -> Self {
        self.robots_timeout = Some(timeout);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionProvider>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Hash of the configuration file, stored with every checkpoint
    pub fn config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn build(self) -> Engine {
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpFetcher::new(&self.user_agent)));
        let proxies = Arc::new(ProxyPool::new(self.proxy));
        let robots = Arc::new(RobotsGate::new(
            self.user_agent.crawler_name.clone(),
            self.robots,
            self.robots_timeout.unwrap_or(DEFAULT_ROBOTS_TIMEOUT),
            Arc::clone(&fetcher),
            Arc::clone(&proxies),
        ));
        let (outcomes, _) = broadcast::channel(OUTCOME_BUFFER);

        let services = Services {
            fetcher,
            parser: self.parser.unwrap_or_else(|| Arc::new(HtmlParser::new())),
            sessions: self.sessions.unwrap_or_else(|| Arc::new(NoSession)),
            sink: self.sink.unwrap_or_else(|| Arc::new(MemorySink::new())),
            proxies,
            robots,
            store: self.store,
            outcomes,
        };

        Engine {
            services: Arc::new(services),
            jobs: Mutex::new(HashMap::new()),
            config_hash: self.config_hash,
        }
    }
}

pub struct Engine {
    services: Arc<Services>,
    jobs: Mutex<HashMap<JobId, Arc<Job>>>,
    config_hash: Option<String>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Builds an engine with the default collaborators wired from a config file
    ///
    /// Checkpoints go to `output.checkpoint-path` and records to
    /// `output.records-path`.
    pub fn from_config(config: &Config, config_hash: Option<String>) -> Result<Self> {
        let store = SqliteCheckpointStore::new(Path::new(&config.output.checkpoint_path))?;

        let mut builder = EngineBuilder::new()
            .user_agent(config.user_agent.clone())
            .proxy_config(config.proxy.clone())
            .robots_config(config.robots.clone())
            .robots_timeout(config.job.settings.request_timeout())
            .sink(Arc::new(JsonLinesSink::new(&config.output.records_path)))
            .store(Arc::new(store));

        if let Some(sessions) = StaticSessionProvider::from_config(&config.auth) {
            builder = builder.sessions(Arc::new(sessions));
        }
        if let Some(hash) = config_hash {
            builder = builder.config_hash(hash);
        }

        Ok(builder.build())
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn job(&self, id: JobId) -> std::result::Result<Arc<Job>, JobError> {
        self.jobs()
            .get(&id)
            .cloned()
            .ok_or(JobError::NotFound(id))
    }

    fn store(&self) -> std::result::Result<Arc<dyn CheckpointStore>, JobError> {
        self.services.store.clone().ok_or(JobError::NoStore)
    }

    /// Fills the proxy pool from `proxy.api-url`, when one is configured
    ///
    /// The static endpoint list stays in place, so a failed request leaves
    /// the pool as configured.
    ///
    /// # Returns
    ///
    /// The number of endpoints added; `0` without an API.
    pub async fn refresh_proxies(&self) -> Result<usize> {
        let Some(api_url) = self.services.proxies.api_url() else {
            return Ok(0);
        };
        let added =
            refresh_from_api(self.services.fetcher.as_ref(), api_url, &self.services.proxies)
                .await?;
        Ok(added)
    }

    /// Validates the job and starts it
    ///
    /// A malformed start URL or an out-of-range setting is rejected before
    /// any job exists.
    ///
    /// # Arguments
    ///
    /// * `start_urls` - Seeds, admitted at depth 0
    /// * `config` - Settings for this job, checkpointed with it
    ///
    /// # Returns
    ///
    /// The new job's id; the job is already running.
    pub fn submit(&self, start_urls: &[String], config: JobConfig) -> Result<JobId> {
        validate_job_config(&config)?;
        let seeds = validate_seeds(start_urls)?;

        let id = Uuid::new_v4();
        let job = Arc::new(Job::new(
            id,
            config,
            seeds,
            Arc::clone(&self.services),
            self.config_hash.clone(),
        ));
        self.jobs().insert(id, Arc::clone(&job));

        info!("Submitted job {} with {} start URLs", id, start_urls.len());
        job.start()?;
        Ok(id)
    }

    /// Stops a running job and checkpoints it; returns the settled status
    pub async fn pause(&self, id: JobId) -> Result<JobStatus> {
        let job = self.job(id)?;
        Ok(job.pause().await?)
    }

    /// Restarts a paused (or restored) job
    pub fn resume(&self, id: JobId) -> Result<()> {
        let job = self.job(id)?;
        info!("Resuming job {}", id);
        job.start()?;
        Ok(())
    }

    pub async fn cancel(&self, id: JobId, mode: CancelMode) -> Result<JobStatus> {
        let job = self.job(id)?;
        Ok(job.cancel(mode).await?)
    }

    pub fn status(&self, id: JobId) -> Result<JobSnapshot> {
        Ok(self.job(id)?.snapshot())
    }

    /// Waits until the job stops running, then returns its snapshot
    pub async fn wait(&self, id: JobId) -> Result<JobSnapshot> {
        let job = self.job(id)?;
        job.wait().await;
        Ok(job.snapshot())
    }

    /// Loads a checkpointed job into the engine without starting it
    pub async fn restore(&self, id: JobId) -> Result<JobSnapshot> {
        if self.jobs().contains_key(&id) {
            return Err(JobError::AlreadyLoaded(id).into());
        }
        let store = self.store()?;

        let record = tokio::task::spawn_blocking(move || store.load(&id))
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?
            .map_err(JobError::from)?
            .ok_or(JobError::NotFound(id))?;

        if let (Some(saved), Some(current)) = (&record.config_hash, &self.config_hash) {
            if saved != current {
                warn!(
                    "Configuration changed since job {} was checkpointed ({} -> {})",
                    id, saved, current
                );
            }
        }

        let job = Arc::new(Job::from_checkpoint(record, Arc::clone(&self.services)));
        let snapshot = job.snapshot();
        {
            let mut jobs = self.jobs();
            if jobs.contains_key(&id) {
                return Err(JobError::AlreadyLoaded(id).into());
            }
            jobs.insert(id, job);
        }

        info!(
            "Restored job {} as {} ({} pending, {} visited)",
            id,
            snapshot.status,
            snapshot.frontier.pending(),
            snapshot.frontier.visited
        );
        Ok(snapshot)
    }

    /// Drops a job that is not running from the engine
    ///
    /// Its checkpoint stays in the store.
    pub fn evict(&self, id: JobId) -> Result<JobSnapshot> {
        let mut jobs = self.jobs();
        let job = jobs.get(&id).ok_or(JobError::NotFound(id))?;
        if job.status() == JobStatus::Running {
            return Err(JobError::StillRunning(id).into());
        }
        let snapshot = job.snapshot();
        jobs.remove(&id);
        Ok(snapshot)
    }

    /// Snapshots of every loaded job
    pub fn list(&self) -> Vec<JobSnapshot> {
        let jobs: Vec<Arc<Job>> = self.jobs().values().cloned().collect();
        let mut snapshots: Vec<JobSnapshot> = jobs.iter().map(|job| job.snapshot()).collect();
        snapshots.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        snapshots
    }

    /// Every job in the checkpoint store, most recently updated first
    pub async fn list_stored(&self) -> Result<Vec<JobSummary>> {
        let store = self.store()?;
        let summaries = tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| StorageError::Database(e.to_string()))??;
        Ok(summaries)
    }

    /// Receives the outcome of every URL of every job
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.services.outcomes.subscribe()
    }

    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.services.proxies
    }

    pub fn robots(&self) -> &Arc<RobotsGate> {
        &self.services.robots
    }

    /// Pauses every running job so each leaves a checkpoint
    pub async fn shutdown(&self) {
        let running: Vec<Arc<Job>> = self
            .jobs()
            .values()
            .filter(|job| job.status() == JobStatus::Running)
            .cloned()
            .collect();

        for job in running {
            if let Err(e) = job.pause().await {
                warn!("Failed to pause job {} on shutdown: {}", job.id(), e);
            }
        }
    }
}
