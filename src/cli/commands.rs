//! CLI command definitions for scrape-queue.
//!
//! Commands that change the queue (`run`, `serve`, `add`, `cancel`,
//! `cleanup`) open it, act, and shut it down so the snapshot is rewritten.
//! Read-only commands (`status`, `list`, `stats`) only read the snapshot
//! file. Mutating commands must not run while a `serve` process owns the
//! same storage directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{QueueConfig, WorkerPoolConfig};
use crate::executor::{Executor, HttpExecutor};
use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    JobConfig, JobPriority, JobQueue, JobRecord, JobRequest, JobStatus, PoolStats, QueueError,
    QueueStats, ScrapeCoordinator, SnapshotState, SnapshotStore,
};

/// Default time `run` waits for its jobs to finish.
const DEFAULT_WAIT_SECS: u64 = 600;

/// How often `serve` logs queue statistics.
const SERVE_STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Priority job queue and worker pool for web scraping.
#[derive(Parser)]
#[command(name = "scrape-queue")]
#[command(about = "Priority job queue and worker pool for web scraping")]
#[command(version)]
#[command(
    long_about = "scrape-queue keeps a persistent, prioritized queue of scrape jobs and runs a pool of workers over it.\n\nJob state is snapshotted to <storage>/jobs.json and restored on the next start.\n\nExample usage:\n  scrape-queue run https://example.com https://example.org --workers 4\n  scrape-queue add https://example.com --priority high\n  scrape-queue serve --workers 8"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Directory holding the job snapshot (overrides SCRAPE_QUEUE_STORAGE_PATH).
    #[arg(short, long, global = true)]
    pub storage: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Enqueue URLs, process them with a worker pool and print the outcome.
    Run(RunArgs),

    /// Run a worker pool over the persisted queue until Ctrl-C.
    Serve(ServeArgs),

    /// Enqueue URLs without processing them.
    Add(AddArgs),

    /// Show one job.
    Status(StatusArgs),

    /// Cancel a pending job.
    Cancel(CancelArgs),

    /// Show queue counters.
    Stats(StatsArgs),

    /// List jobs, optionally filtered by status.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Purge finished jobs older than a number of days.
    Cleanup(CleanupArgs),
}

/// Options describing the jobs to enqueue.
#[derive(clap::Args, Debug, Clone)]
pub struct JobArgs {
    /// Job priority (low, normal, high, urgent).
    #[arg(short, long, default_value = "normal")]
    pub priority: JobPriority,

    /// Tag to attach (repeatable).
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Executor config as a JSON object, e.g. '{"user_agent": "bot/1.0"}'.
    #[arg(long)]
    pub config: Option<String>,

    /// Retries allowed after the first attempt (default from environment or 3).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-job timeout in seconds (default from environment or 300).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: Option<u64>,
}

/// Options for the worker pool.
#[derive(clap::Args, Debug, Clone)]
pub struct PoolArgs {
    /// Number of workers (default from environment or 4).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Retire each worker after this many jobs.
    #[arg(long)]
    pub max_jobs_per_worker: Option<u64>,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value = "30")]
    pub request_timeout_secs: u64,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// URLs to scrape.
    #[arg(required = true)]
    pub urls: Vec<String>,

    #[command(flatten)]
    pub job: JobArgs,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Maximum time to wait for all jobs, in seconds.
    #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
    pub wait_secs: u64,

    /// Print the results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub print_metrics: bool,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub pool: PoolArgs,
}

#[derive(Parser, Debug)]
pub struct AddArgs {
    /// URLs to enqueue.
    #[arg(required = true)]
    pub urls: Vec<String>,

    #[command(flatten)]
    pub job: JobArgs,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job id.
    pub id: Uuid,
}

#[derive(Parser, Debug)]
pub struct CancelArgs {
    /// Job id.
    pub id: Uuid,
}

#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Print as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only show jobs in this status.
    #[arg(long)]
    pub status: Option<JobStatus>,

    /// Show at most this many jobs.
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct CleanupArgs {
    /// Retention window in days (default from SCRAPE_QUEUE_RETENTION_DAYS or 7).
    #[arg(short, long)]
    pub days: Option<u32>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let storage = cli.storage;
    match cli.command {
        Commands::Run(args) => run_run_command(storage, args).await,
        Commands::Serve(args) => run_serve_command(storage, args).await,
        Commands::Add(args) => run_add_command(storage, args).await,
        Commands::Status(args) => run_status_command(storage, args).await,
        Commands::Cancel(args) => run_cancel_command(storage, args).await,
        Commands::Stats(args) => run_stats_command(storage, args).await,
        Commands::List(args) => run_list_command(storage, args).await,
        Commands::Cleanup(args) => run_cleanup_command(storage, args).await,
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

fn queue_config(storage: Option<PathBuf>) -> anyhow::Result<QueueConfig> {
    let mut config = QueueConfig::from_env().context("invalid queue configuration")?;
    if let Some(path) = storage {
        config.storage_path = Some(path);
    }
    Ok(config)
}

fn pool_config(args: &PoolArgs) -> anyhow::Result<WorkerPoolConfig> {
    let mut config = WorkerPoolConfig::from_env().context("invalid worker pool configuration")?;
    if let Some(workers) = args.workers {
        config.num_workers = workers;
    }
    if let Some(max_jobs) = args.max_jobs_per_worker {
        config.max_jobs_per_worker = Some(max_jobs);
    }
    config.validate()?;
    Ok(config)
}

fn executor(args: &PoolArgs) -> Arc<dyn Executor> {
    Arc::new(HttpExecutor::new(Duration::from_secs(
        args.request_timeout_secs,
    )))
}

fn parse_job_config(raw: Option<&str>) -> anyhow::Result<JobConfig> {
    match raw {
        None => Ok(JobConfig::new()),
        Some(raw) => serde_json::from_str(raw).context("--config must be a JSON object"),
    }
}

fn enqueue(queue: &JobQueue, urls: &[String], args: &JobArgs) -> anyhow::Result<Vec<Uuid>> {
    let config = parse_job_config(args.config.as_deref())?;
    let defaults = queue.config();
    let max_retries = args.max_retries.unwrap_or(defaults.default_max_retries);
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.default_job_timeout);

    let mut ids = Vec::with_capacity(urls.len());
    for url in urls {
        let request = JobRequest::new(url.as_str())
            .with_config(config.clone())
            .with_priority(args.priority)
            .with_tags(args.tags.clone())
            .with_max_retries(max_retries)
            .with_timeout(timeout);
        ids.push(queue.add_job(request)?);
    }
    Ok(ids)
}

async fn read_snapshot(storage: Option<PathBuf>) -> anyhow::Result<SnapshotState> {
    let config = queue_config(storage)?;
    let path = config
        .snapshot_path()
        .context("no storage path configured (use --storage)")?;
    Ok(SnapshotStore::new(path).load().await)
}

fn print_job(job: &JobRecord) {
    let error = job
        .error
        .as_deref()
        .map(|e| format!("  error: {}", e))
        .unwrap_or_default();
    println!(
        "{}  {:<9}  {:<6}  retries {}/{}  {}{}",
        job.id, job.status, job.priority, job.retry_count, job.max_retries, job.target, error
    );
}

fn print_queue_stats(stats: &QueueStats) {
    println!("\n=== Queue ===");
    println!("Total:          {}", stats.total);
    println!("Pending:        {}", stats.pending);
    println!("Running:        {}", stats.running);
    println!("Completed:      {}", stats.completed);
    println!("Failed:         {} ({} timed out)", stats.failed, stats.timed_out);
    println!("Cancelled:      {}", stats.cancelled);
    println!(
        "Avg processing: {:.2}s",
        stats.avg_processing_time.as_secs_f64()
    );
}

fn print_pool_stats(stats: &PoolStats) {
    println!("\n=== Workers ===");
    println!("Workers:        {}", stats.num_workers);
    println!("Processed:      {}", stats.jobs_processed);
    println!("Succeeded:      {}", stats.jobs_succeeded);
    println!("Failed:         {}", stats.jobs_failed);
    println!("Success rate:   {:.1}%", stats.success_rate());
    for worker in &stats.workers {
        println!(
            "  {}  processed {:>4}  ok {:>4}  failed {:>4}  avg {:.2}s",
            worker.worker_id,
            worker.jobs_processed,
            worker.jobs_succeeded,
            worker.jobs_failed,
            worker.average_processing_time.as_secs_f64()
        );
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Serialize)]
struct RunSummary {
    jobs: Vec<JobRecord>,
    queue: QueueStats,
    workers: PoolStats,
}

async fn run_run_command(storage: Option<PathBuf>, args: RunArgs) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let queue = JobQueue::open(queue_config(storage)?).await?;
    let mut coordinator =
        ScrapeCoordinator::new(Arc::clone(&queue), pool_config(&args.pool)?, executor(&args.pool))?;

    let ids = enqueue(&queue, &args.urls, &args.job)?;
    info!(count = ids.len(), "Enqueued jobs");
    coordinator.start_workers()?;

    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    for id in &ids {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match queue.get_result(*id, remaining).await {
            Ok(_) => {}
            Err(QueueError::ResultTimeout(_)) => {
                warn!(job_id = %id, "Gave up waiting for job");
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "Job did not complete");
            }
        }
    }

    let summary = RunSummary {
        jobs: ids.iter().filter_map(|id| queue.get_job_status(*id)).collect(),
        queue: coordinator.queue_stats(),
        workers: coordinator.worker_stats(),
    };
    coordinator.shutdown().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("=== Jobs ===");
        for job in &summary.jobs {
            print_job(job);
        }
        print_queue_stats(&summary.queue);
        print_pool_stats(&summary.workers);
    }

    if args.print_metrics {
        println!("\n{}", export_metrics());
    }

    Ok(())
}

async fn run_serve_command(storage: Option<PathBuf>, args: ServeArgs) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let mut coordinator = ScrapeCoordinator::open(
        queue_config(storage)?,
        pool_config(&args.pool)?,
        executor(&args.pool),
    )
    .await?;
    coordinator.start_workers()?;
    info!("Serving; press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(SERVE_STATS_INTERVAL);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let stats = coordinator.queue_stats();
                info!(
                    pending = stats.pending,
                    running = stats.running,
                    completed = stats.completed,
                    failed = stats.failed,
                    "Queue status"
                );
            }
        }
    }

    let queue_stats = coordinator.queue_stats();
    let pool_stats = coordinator.worker_stats();
    coordinator.shutdown().await?;

    print_queue_stats(&queue_stats);
    print_pool_stats(&pool_stats);
    Ok(())
}

async fn run_add_command(storage: Option<PathBuf>, args: AddArgs) -> anyhow::Result<()> {
    let queue = JobQueue::open(queue_config(storage)?).await?;
    let ids = enqueue(&queue, &args.urls, &args.job);
    queue.shutdown().await?;

    for id in ids? {
        println!("{}", id);
    }
    Ok(())
}

async fn run_status_command(storage: Option<PathBuf>, args: StatusArgs) -> anyhow::Result<()> {
    let snapshot = read_snapshot(storage).await?;
    let job = snapshot
        .into_records()
        .into_iter()
        .find(|job| job.id == args.id)
        .with_context(|| format!("job {} not found", args.id))?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn run_cancel_command(storage: Option<PathBuf>, args: CancelArgs) -> anyhow::Result<()> {
    let queue = JobQueue::open(queue_config(storage)?).await?;
    let cancelled = queue.cancel_job(args.id);
    queue.shutdown().await?;

    if cancelled {
        println!("Cancelled {}", args.id);
        Ok(())
    } else {
        anyhow::bail!("job {} is not pending", args.id)
    }
}

async fn run_stats_command(storage: Option<PathBuf>, args: StatsArgs) -> anyhow::Result<()> {
    let snapshot = read_snapshot(storage).await?;
    let stats = QueueStats {
        total: snapshot.len(),
        pending: snapshot.pending.len(),
        running: snapshot.running.len(),
        completed: snapshot.completed.len(),
        failed: snapshot.failed.len(),
        cancelled: snapshot.cancelled.len(),
        timed_out: snapshot
            .failed
            .iter()
            .filter(|job| job.status == JobStatus::TimedOut)
            .count(),
        avg_processing_time: average_processing_time(&snapshot.completed),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_queue_stats(&stats);
    }
    Ok(())
}

fn average_processing_time(jobs: &[JobRecord]) -> Duration {
    let times: Vec<Duration> = jobs.iter().filter_map(JobRecord::processing_time).collect();
    if times.is_empty() {
        return Duration::ZERO;
    }
    times.iter().sum::<Duration>() / times.len() as u32
}

async fn run_list_command(storage: Option<PathBuf>, args: ListArgs) -> anyhow::Result<()> {
    let mut jobs = read_snapshot(storage).await?.into_records();
    if let Some(wanted) = args.status {
        jobs.retain(|job| job.status == wanted || job.status.reported() == wanted);
    }
    jobs.sort_by_key(|job| job.sequence);

    let limit = args.limit.unwrap_or(jobs.len());
    for job in jobs.iter().take(limit) {
        print_job(job);
    }
    if jobs.len() > limit {
        println!("... {} more", jobs.len() - limit);
    }
    Ok(())
}

async fn run_cleanup_command(storage: Option<PathBuf>, args: CleanupArgs) -> anyhow::Result<()> {
    let queue = JobQueue::open(queue_config(storage)?).await?;
    let retention = match args.days {
        Some(days) => chrono::Duration::days(i64::from(days)),
        None => chrono::Duration::from_std(queue.config().retention)
            .context("retention window out of range")?,
    };
    let report = queue.cleanup_old_jobs(retention);
    queue.shutdown().await?;

    println!(
        "Purged {} jobs ({} completed, {} failed, {} cancelled)",
        report.total(),
        report.completed,
        report.failed,
        report.cancelled
    );
    Ok(())
}
