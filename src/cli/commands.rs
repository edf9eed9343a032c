//! CLI command definitions for commitlens.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{CodeParser, CommitAnalysis, CommitAnalyzer, ParsedCodeCache};
use crate::api;
use crate::config::ServiceConfig;
use crate::metrics::init_metrics;
use crate::scheduler::{EnqueueRequest, Job, JobQueue, JobType};
use crate::service::{Backends, Service};

/// Commit and repository analysis service.
#[derive(Parser, Debug)]
#[command(name = "commitlens")]
#[command(about = "Analyze commits, repositories and documentation through durable job queues")]
#[command(version)]
#[command(
    long_about = "commitlens analyzes git commits for complexity, risk and impact.\n\nJobs are queued in Redis (or in process) and processed by per-queue worker pools.\n\nExample usage:\n  commitlens serve --addr 0.0.0.0:8080\n  commitlens enqueue analyze_commit --payload '{\"repository\":{\"url\":\"https://github.com/org/repo.git\"},\"commit_sha\":\"abc123\"}'\n  commitlens analyze-diff change.diff"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file; environment variables take precedence.
    #[arg(short, long, env = "COMMITLENS_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API, the worker pools and the maintenance schedules.
    Serve(ServeArgs),

    /// Run the worker pools and maintenance schedules without the HTTP API.
    Work,

    /// Enqueue a job.
    Enqueue(EnqueueArgs),

    /// Show a job's status, progress and result.
    Status(StatusArgs),

    /// Show per-queue counts.
    Stats(StatsArgs),

    /// Analyze a unified diff file without queuing a job.
    #[command(name = "analyze-diff")]
    AnalyzeDiff(AnalyzeDiffArgs),
}

/// Arguments for `commitlens serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address; overrides COMMITLENS_HTTP_ADDR.
    #[arg(short, long)]
    pub addr: Option<String>,
}

/// Arguments for `commitlens enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Job type (analyze_commit, analyze_repository, generate_docs).
    pub job_type: JobType,

    /// JSON payload.
    #[arg(short, long, conflicts_with = "payload_file")]
    pub payload: Option<String>,

    /// File containing the JSON payload.
    #[arg(long)]
    pub payload_file: Option<PathBuf>,

    /// Higher values are leased sooner.
    #[arg(long)]
    pub priority: Option<i32>,

    /// Milliseconds before the job becomes leasable.
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Attempts before the job fails for good.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `commitlens status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job id.
    pub id: Uuid,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `commitlens stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `commitlens analyze-diff`.
#[derive(Parser, Debug)]
pub struct AnalyzeDiffArgs {
    /// Unified diff file, or `-` for stdin.
    pub path: PathBuf,

    /// Commit message considered by impact assessment.
    #[arg(short, long, default_value = "")]
    pub message: String,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let load_config = || {
        ServiceConfig::load(cli.config.as_deref()).context("Failed to load configuration")
    };

    match cli.command {
        Commands::Serve(args) => run_serve_command(load_config()?, args).await,
        Commands::Work => run_work_command(load_config()?).await,
        Commands::Enqueue(args) => run_enqueue_command(load_config()?, args).await,
        Commands::Status(args) => run_status_command(load_config()?, args).await,
        Commands::Stats(args) => run_stats_command(load_config()?, args).await,
        Commands::AnalyzeDiff(args) => run_analyze_diff_command(load_config()?, args).await,
    }
}

// ============================================================================
// Service Commands
// ============================================================================

async fn run_serve_command(mut config: ServiceConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(addr) = args.addr {
        config.http_addr = addr;
    }
    let addr = config.http_addr()?;
    init_metrics().context("Failed to initialize metrics")?;

    let service = Service::connect(config).await?;
    let workers = service.start_workers().await?;
    let state = service.app_state(workers.health());

    let served = api::serve(addr, state, shutdown_signal()).await;
    workers.shutdown().await?;
    served.context("HTTP server failed")?;
    Ok(())
}

async fn run_work_command(config: ServiceConfig) -> anyhow::Result<()> {
    init_metrics().context("Failed to initialize metrics")?;

    let service = Service::connect(config).await?;
    let workers = service.start_workers().await?;
    shutdown_signal().await;
    workers.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}

// ============================================================================
// Queue Commands
// ============================================================================

async fn open_queue(config: &ServiceConfig) -> anyhow::Result<JobQueue> {
    if config.redis_url.is_none() || config.database_url.is_none() {
        warn!("REDIS_URL or DATABASE_URL not set; queue state is local to this process");
    }
    let backends = Backends::connect(config).await?;
    Ok(JobQueue::new(backends.store, backends.broker)
        .with_backoff(config.backoff())
        .with_default_max_attempts(config.max_attempts))
}

#[derive(Debug, Serialize)]
struct EnqueueOutput {
    id: Uuid,
    queue: &'static str,
}

async fn run_enqueue_command(config: ServiceConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let raw = match (&args.payload, &args.payload_file) {
        (Some(payload), _) => payload.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file {}", path.display()))?,
        (None, None) => anyhow::bail!("Either --payload or --payload-file is required"),
    };
    let payload: serde_json::Value = serde_json::from_str(&raw).context("Payload is not valid JSON")?;

    let mut request = EnqueueRequest::new(args.job_type, payload);
    if let Some(priority) = args.priority {
        request = request.with_priority(priority);
    }
    if let Some(delay_ms) = args.delay_ms {
        request = request.with_delay(Duration::from_millis(delay_ms));
    }
    if let Some(max_attempts) = args.max_attempts {
        request = request.with_max_attempts(max_attempts);
    }

    let queue = open_queue(&config).await?;
    let id = queue.enqueue(request).await?;
    let output = EnqueueOutput {
        id,
        queue: args.job_type.queue_name(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Enqueued {} on {}", output.id, output.queue);
    }
    Ok(())
}

async fn run_status_command(config: ServiceConfig, args: StatusArgs) -> anyhow::Result<()> {
    let queue = open_queue(&config).await?;
    let job = queue
        .get_job(args.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Job {} not found", args.id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job(&job);
    }
    Ok(())
}

fn print_job(job: &Job) {
    println!("Job:       {}", job.id);
    println!("Type:      {} ({})", job.job_type, job.queue_name());
    println!("Status:    {}", job.status);
    println!("Attempts:  {}/{}", job.attempts, job.max_attempts);
    println!("Priority:  {}", job.priority);
    println!("Created:   {}", job.created_at.to_rfc3339());
    if let Some(progress) = &job.progress {
        println!("Progress:  {}% {}", progress.percent, progress.message);
    }
    if let Some(error) = &job.error {
        println!("Error:     {}", error);
    }
    if let Some(result) = &job.result {
        println!("Result:    {}", result);
    }
}

async fn run_stats_command(config: ServiceConfig, args: StatsArgs) -> anyhow::Result<()> {
    let queue = open_queue(&config).await?;
    let stats = queue.all_stats().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!(
        "{:<22} {:>8} {:>8} {:>10} {:>8} {:>8} {:>8}",
        "QUEUE", "WAITING", "ACTIVE", "COMPLETED", "FAILED", "DELAYED", "PAUSED"
    );
    for s in &stats {
        println!(
            "{:<22} {:>8} {:>8} {:>10} {:>8} {:>8} {:>8}",
            s.queue, s.waiting, s.active, s.completed, s.failed, s.delayed, s.paused
        );
    }
    Ok(())
}

// ============================================================================
// Analyze Diff Command
// ============================================================================

async fn run_analyze_diff_command(config: ServiceConfig, args: AnalyzeDiffArgs) -> anyhow::Result<()> {
    let diff = if args.path.as_os_str() == "-" {
        tokio::task::spawn_blocking(|| std::io::read_to_string(std::io::stdin()))
            .await?
            .context("Failed to read diff from stdin")?
    } else {
        tokio::fs::read_to_string(&args.path)
            .await
            .with_context(|| format!("Failed to read diff {}", args.path.display()))?
    };

    let analyzer = CommitAnalyzer::new(
        Arc::new(CodeParser::new()),
        Arc::new(ParsedCodeCache::default()),
        config.risk,
    );
    let analysis = analyzer.analyze_diff(&args.message, &diff);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print_analysis(&analysis);
    }
    Ok(())
}

fn print_analysis(analysis: &CommitAnalysis) {
    println!("Risk:            {}", analysis.risk_level);
    println!("Files:           {}", analysis.files.len());
    println!("Lines changed:   {}", analysis.lines_changed);
    println!("Complexity diff: {:+}", analysis.complexity_change);
    println!(
        "Maintainability: {:.1}",
        analysis.metrics.maintainability_index
    );

    if !analysis.files.is_empty() {
        println!();
        for file in &analysis.files {
            println!(
                "  {:<8} {:>5}+ {:>5}-  {}",
                file.analysis.risk_level.as_str(),
                file.additions,
                file.deletions,
                file.path
            );
        }
    }

    if !analysis.impact.breaking_changes.is_empty() {
        println!();
        println!("Breaking changes:");
        for change in &analysis.impact.breaking_changes {
            println!("  - {}", change.description);
        }
    }

    if !analysis.degraded_files.is_empty() {
        println!();
        println!("Pattern-parsed: {}", analysis.degraded_files.join(", "));
    }
}
