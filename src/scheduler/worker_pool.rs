//! Per-queue worker pools.
//!
//! Each pool serves one job type with its own worker count, so a burst in one
//! analysis family cannot starve another. Every worker runs as an independent
//! async task in a lease → execute → resolve loop.
//!
//! # Features
//!
//! - Graceful shutdown with broadcast channel
//! - Hard per-job deadline; an expired handler is aborted and retried
//! - Handler panics are contained to the job that raised them
//! - Progress updates persisted by a collector task
//! - Stale-lease recovery and broker resync on start

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobStatus, JobType};
use super::processor::{HandlerRegistry, JobHandler, ProgressReporter, ProgressUpdate};
use super::queue::{JobQueue, QueueError};
use crate::error::JobError;
use crate::metrics::MetricsCollector;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("No handler registered for {0}")]
    MissingHandler(JobType),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Pool is already running")]
    AlreadyRunning,

    #[error("Pool is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for one worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Job type (and therefore queue) the pool serves.
    pub job_type: JobType,
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,
    /// Hard deadline for a single handler invocation.
    pub job_timeout: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Age after which a `Processing` job is considered abandoned.
    pub lease_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            job_type: JobType::AnalyzeCommit,
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(60),
            lease_timeout: Duration::from_secs(1200),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(job_type: JobType, num_workers: usize) -> Self {
        Self {
            job_type,
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the job timeout; the lease timeout follows at twice its value.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self.lease_timeout = timeout.saturating_mul(2);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.num_workers == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "{} pool needs at least one worker",
                self.job_type.queue_name()
            )));
        }
        if self.job_timeout.is_zero() {
            return Err(PoolError::InvalidConfig("job_timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PoolStats {
    pub queue: String,
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Attempts that completed their job.
    pub jobs_completed: u64,
    /// Attempts that failed (retried or not).
    pub jobs_failed: u64,
    /// Average attempt duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of attempts processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
#[derive(Default)]
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn record(&self, succeeded: bool, duration: Duration) {
        let counter = if succeeded {
            &self.jobs_completed
        } else {
            &self.jobs_failed
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn snapshot(&self, queue: &str, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let total_jobs = completed + failed;

        PoolStats {
            queue: queue.to_string(),
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: if total_jobs > 0 {
                Duration::from_millis(total_duration_ms / total_jobs)
            } else {
                Duration::ZERO
            },
        }
    }
}

/// Workers serving a single queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    collector_handle: Option<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
    metrics: MetricsCollector,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            handler,
            shutdown_tx,
            worker_handles: Vec::new(),
            collector_handle: None,
            stats: Arc::new(SharedPoolStats::default()),
            is_running: AtomicBool::new(false),
            metrics: MetricsCollector::new(),
        }
    }

    /// Recovers abandoned jobs, then starts the workers.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }
        self.config.validate()?;
        let queue_name = self.config.job_type.queue_name();

        match self.queue.recover_stale(self.config.lease_timeout).await {
            Ok(recovered) if recovered > 0 => {
                info!(queue = queue_name, recovered, "Recovered abandoned jobs");
            }
            Ok(_) => {}
            Err(e) => warn!(queue = queue_name, error = %e, "Failed to recover abandoned jobs"),
        }
        if let Err(e) = self.queue.resync(self.config.job_type).await {
            warn!(queue = queue_name, error = %e, "Failed to resync queue from store");
        }

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        self.collector_handle = Some(tokio::spawn(collect_progress(
            Arc::clone(&self.queue),
            progress_rx,
        )));

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("{}-{}", queue_name, i),
                config: self.config.clone(),
                queue: Arc::clone(&self.queue),
                handler: Arc::clone(&self.handler),
                shutdown_rx: self.shutdown_tx.subscribe(),
                progress_tx: progress_tx.clone(),
                stats: Arc::clone(&self.stats),
                metrics: self.metrics,
            };
            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        self.metrics.update_workers(queue_name, self.config.num_workers);
        info!(
            queue = queue_name,
            num_workers = self.config.num_workers,
            "Worker pool started"
        );
        Ok(())
    }

    /// Signals every worker and waits for in-flight jobs to resolve.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }
        let queue_name = self.config.job_type.queue_name();
        info!(queue = queue_name, "Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let workers = std::mem::take(&mut self.worker_handles);
        let collector = self.collector_handle.take();
        let drain = async move {
            for handle in workers {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
            // Closes once the last worker has dropped its sender.
            if let Some(collector) = collector {
                let _ = collector.await;
            }
        };

        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.update_workers(queue_name, 0);
        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(()) => {
                info!(queue = queue_name, "Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
            .snapshot(self.config.job_type.queue_name(), self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn job_type(&self) -> JobType {
        self.config.job_type
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

/// Persists progress updates until every sender is gone.
async fn collect_progress(queue: Arc<JobQueue>, mut rx: mpsc::UnboundedReceiver<ProgressUpdate>) {
    while let Some(update) = rx.recv().await {
        if let Err(e) = queue.report_progress(update.job_id, update.progress).await {
            debug!(job_id = %update.job_id, error = %e, "Failed to persist progress");
        }
    }
}

/// A single worker that processes jobs from one queue.
struct Worker {
    id: String,
    config: WorkerPoolConfig,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown_rx: broadcast::Receiver<()>,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            let idle = match self.queue.lease(self.config.job_type).await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to lease job");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = self.shutdown_rx.recv() => {
                        info!(worker_id = %self.id, "Worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let queue_name = job.queue_name();
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            queue = queue_name,
            attempt = job.attempts + 1,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        self.stats.active_workers.fetch_add(1, Ordering::SeqCst);
        self.metrics.inc_jobs_in_progress();

        let outcome = self.execute_with_timeout(&job).await;
        let duration = start_time.elapsed();

        self.stats.active_workers.fetch_sub(1, Ordering::SeqCst);
        self.metrics.dec_jobs_in_progress();
        self.stats.record(outcome.is_ok(), duration);

        let resolved = match outcome {
            Ok(result) => self.queue.complete(&job, result).await,
            Err(e) => self.queue.fail(&job, &e).await,
        };

        match resolved {
            Ok(resolved) => {
                let outcome = resolved.status.as_str();
                self.metrics
                    .record_job(queue_name, outcome, duration.as_secs_f64());
                if resolved.status == JobStatus::Completed {
                    info!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        duration_ms = duration.as_millis() as u64,
                        "Job completed successfully"
                    );
                }
            }
            Err(e) => {
                // Typically a lease recovered as stale while this attempt ran.
                error!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    error = %e,
                    "Failed to resolve job"
                );
            }
        }
    }

    /// Runs the handler in its own task under the job deadline.
    async fn execute_with_timeout(&self, job: &Job) -> Result<serde_json::Value, JobError> {
        let handler = Arc::clone(&self.handler);
        let reporter = ProgressReporter::new(job.id, self.progress_tx.clone());
        let owned = job.clone();
        let mut task = tokio::spawn(async move { handler.handle(&owned, reporter).await });

        match tokio::time::timeout(self.config.job_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    error = %join_error,
                    "Job handler panicked"
                );
                Err(JobError::transient(format!("Handler panicked: {join_error}")))
            }
            Err(_) => {
                // Dropping the handler future releases its scoped resources.
                task.abort();
                warn!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    timeout_secs = self.config.job_timeout.as_secs(),
                    "Job exceeded its deadline"
                );
                Err(JobError::Timeout(self.config.job_timeout))
            }
        }
    }
}

/// One pool per registered job type.
pub struct PoolSet {
    pools: Vec<WorkerPool>,
    ready: Arc<AtomicBool>,
}

impl PoolSet {
    /// Builds a pool for every config; each config's job type needs a handler.
    pub fn new(
        queue: Arc<JobQueue>,
        registry: &HandlerRegistry,
        configs: Vec<WorkerPoolConfig>,
    ) -> Result<Self, PoolError> {
        let mut pools = Vec::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            let handler = registry
                .get(config.job_type)
                .ok_or(PoolError::MissingHandler(config.job_type))?;
            pools.push(WorkerPool::new(config, Arc::clone(&queue), handler));
        }
        Ok(Self {
            pools,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn start(&mut self) -> Result<(), PoolError> {
        for pool in &mut self.pools {
            pool.start().await?;
        }
        self.ready.store(!self.pools.is_empty(), Ordering::SeqCst);
        Ok(())
    }

    /// Shuts every pool down, reporting the first failure.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        self.ready.store(false, Ordering::SeqCst);
        let mut first_error = None;
        for pool in &mut self.pools {
            if let Err(e) = pool.shutdown().await {
                warn!(queue = pool.job_type().queue_name(), error = %e, "Pool shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(WorkerPool::stats).collect()
    }

    /// Every pool is running.
    pub fn is_ready(&self) -> bool {
        !self.pools.is_empty() && self.pools.iter().all(WorkerPool::is_running)
    }

    /// Flag mirroring [`is_ready`](Self::is_ready) for observers that cannot
    /// borrow the set.
    pub fn readiness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
