//! Driftnet main entry point
//!
//! Runs one crawl job from a TOML configuration file, or inspects and resumes
//! checkpointed jobs.

use anyhow::{bail, Context};
use clap::Parser;
use driftnet::config::{load_config_with_hash, Config};
use driftnet::{Engine, JobId, JobSnapshot, JobStatus};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Driftnet: a polite, resumable crawl orchestrator
///
/// Crawls from the configured seeds through an optional proxy pool while
/// honoring robots.txt and per-host politeness. Progress is checkpointed so
/// an interrupted job can be resumed by id.
#[derive(Parser, Debug)]
#[command(name = "driftnet")]
#[command(version)]
#[command(about = "A polite, resumable crawl orchestrator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume a checkpointed job
    #[arg(long, value_name = "JOB_ID", conflicts_with_all = ["status", "list", "dry_run"])]
    resume: Option<JobId>,

    /// Show a checkpointed job and exit
    #[arg(long, value_name = "JOB_ID", conflicts_with_all = ["list", "dry_run"])]
    status: Option<JobId>,

    /// List checkpointed jobs and exit
    #[arg(long, conflicts_with = "dry_run")]
    list: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let engine = Engine::from_config(&config, Some(config_hash))?;

    if cli.list {
        handle_list(&engine).await
    } else if let Some(id) = cli.status {
        handle_status(&engine, id).await
    } else {
        handle_run(&engine, &config, cli.resume).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("driftnet=info,warn"),
            1 => EnvFilter::new("driftnet=debug,info"),
            2 => EnvFilter::new("driftnet=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn handle_dry_run(config: &Config) {
    let job = &config.job.settings;

    println!("=== Driftnet Dry Run ===\n");

    println!("Job:");
    println!("  Max depth: {}", job.max_depth);
    print_limit("Max pages", job.max_pages);
    print_limit("Max domains", job.max_domains);
    println!("  Workers: {}", job.workers);
    match job.per_host_concurrency {
        Some(cap) => println!("  Per-host concurrency: {}", cap),
        None => println!("  Per-host concurrency: unlimited"),
    }
    println!("  Max attempts: {}", job.max_attempts);
    println!("  Request timeout: {}ms", job.request_timeout_ms);
    println!("  Respect robots.txt: {}", job.respect_robots);
    println!("  Same domain only: {}", job.same_domain_only);
    println!("  Auth required: {}", job.auth_required);
    if !job.allowed_domains.is_empty() {
        println!("  Allowed domains: {}", job.allowed_domains.join(", "));
    }

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nProxies ({}):", config.proxy.endpoints.len());
    if config.proxy.is_direct() {
        println!("  (direct connections)");
    }
    for endpoint in &config.proxy.endpoints {
        println!("  - {}", endpoint);
    }
    if let Some(api_url) = &config.proxy.api_url {
        println!("  + fetched from {}", api_url);
    }

    println!("\nOutput:");
    println!("  Checkpoints: {}", config.output.checkpoint_path);
    println!("  Records: {}", config.output.records_path);

    println!("\nSeeds ({}):", config.job.seeds.len());
    for seed in &config.job.seeds {
        println!("  - {}", seed);
    }

    println!("\n=== Configuration is valid ===");
}

fn print_limit(label: &str, limit: u64) {
    if limit == 0 {
        println!("  {}: unlimited", label);
    } else {
        println!("  {}: {}", label, limit);
    }
}

async fn handle_list(engine: &Engine) -> anyhow::Result<()> {
    let jobs = engine.list_stored().await?;
    if jobs.is_empty() {
        println!("No checkpointed jobs");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:>9}  {:>9}  {:>7}  UPDATED",
        "JOB", "STATUS", "SUCCEEDED", "FAILED", "PENDING"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<10}  {:>9}  {:>9}  {:>7}  {}",
            job.job_id,
            job.status.to_string(),
            job.counters.succeeded,
            job.counters.failed,
            job.pending,
            job.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn handle_status(engine: &Engine, id: JobId) -> anyhow::Result<()> {
    let snapshot = engine.restore(id).await?;
    print_snapshot(&snapshot);
    Ok(())
}

async fn handle_run(engine: &Engine, config: &Config, resume: Option<JobId>) -> anyhow::Result<()> {
    match engine.refresh_proxies().await {
        Ok(0) => {}
        Ok(added) => tracing::info!("Added {} proxies from the proxy api", added),
        Err(e) => tracing::warn!("Proxy api unavailable, using configured endpoints: {}", e),
    }

    let id = match resume {
        Some(id) => {
            let restored = engine.restore(id).await?;
            if restored.status.is_terminal() {
                bail!("job {} is already {}", id, restored.status);
            }
            engine.resume(id)?;
            id
        }
        None => engine.submit(&config.job.seeds, config.job.settings.clone())?,
    };
    println!("Job {}", id);

    let snapshot = tokio::select! {
        snapshot = engine.wait(id) => snapshot?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, checkpointing job {}", id);
            engine.shutdown().await;
            engine.status(id)?
        }
    };

    print_snapshot(&snapshot);
    if snapshot.status == JobStatus::Paused {
        println!("\nResume with: --resume {}", id);
    }
    if snapshot.status == JobStatus::Failed {
        bail!(
            "job {} failed: {}",
            id,
            snapshot.failure.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}

fn print_snapshot(snapshot: &JobSnapshot) {
    let counters = &snapshot.counters;

    println!("\n=== Job {} ===", snapshot.id);
    println!("  Status: {}", snapshot.status);
    if let Some(reason) = &snapshot.failure {
        println!("  Failure: {}", reason);
    }
    println!("  Created: {}", snapshot.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", snapshot.updated_at.format("%Y-%m-%d %H:%M:%S"));

    println!("\nURLs:");
    println!("  Enqueued: {}", counters.enqueued);
    println!("  Succeeded: {}", counters.succeeded);
    println!("  Failed: {}", counters.failed);
    println!("  Skipped: {}", counters.skipped);
    println!("  Filtered: {}", counters.filtered);
    println!("  Duplicates: {}", counters.duplicates);
    println!("  Pending: {}", snapshot.frontier.pending());

    println!("\nRequests:");
    println!("  Attempts: {}", counters.attempts);
    println!("  Responses: {}", counters.fetched);
    println!("  Retries: {}", counters.retried);
    println!("  Error rate: {:.1}%", counters.error_rate() * 100.0);

    println!("\nRecords:");
    println!("  Emitted: {}", counters.records_emitted);
    if counters.emit_failures > 0 {
        println!("  Emit failures: {}", counters.emit_failures);
    }
}
