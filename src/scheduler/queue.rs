//! Multi-queue job scheduling over a store and a broker.
//!
//! `JobQueue` owns every job state transition:
//!
//! - Enqueue persists the job, then makes it visible in its type's queue
//! - Lease pops an id from the broker and claims it in the store
//! - Complete/fail resolve the claimed job; failures either schedule a retry
//!   with exponential backoff or fail the job for good
//!
//! # Reliability
//!
//! The store's claim is a compare-and-set, so a job leased twice through a
//! broker glitch is still processed once. Jobs left in `Processing` by a
//! crashed worker are found by [`JobQueue::recover_stale`] and sent back
//! through the retry protocol. [`JobQueue::resync`] rebuilds broker state from
//! the store after a broker restart.
//!
//! Store and broker are separate systems, so a step can fail halfway. The
//! store write always comes first. When the broker step after it fails, or a
//! store call fails on an id already taken out of the broker, the id is handed
//! back to the broker's delayed set (due now). If that also fails, the job is
//! still recorded as pending in the store and the periodic resync republishes
//! it, so a pending job is never invisible to workers for longer than one
//! resync interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::broker::{BrokerError, MemoryBroker, QueueBroker};
use super::job::{Job, JobProgress, JobStatus, JobType, DEFAULT_MAX_ATTEMPTS};
use super::store::{MemoryJobStore, JobStore, Resolution, StoreError};
use crate::error::JobError;
use crate::metrics::MetricsCollector;

/// Upper bound on jobs examined per resync or recovery pass.
const SCAN_LIMIT: usize = 10_000;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid {job_type} payload: {reason}")]
    InvalidPayload { job_type: JobType, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("Unknown queue '{0}'")]
    UnknownQueue(String),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),
}

impl QueueError {
    /// Whether the error came from infrastructure rather than the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Broker(_) | QueueError::Store(StoreError::Backend(_))
        )
    }
}

/// Exponential retry delay: `base · 2^(attempts−1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2000),
            max: Duration::from_secs(3600),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// Delay before the retry that follows failed attempt number `attempts`.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// A request to create a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Milliseconds before the job becomes leasable.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl EnqueueRequest {
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            payload,
            priority: None,
            delay_ms: None,
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Aggregate counts for one logical queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub paused: usize,
}

impl QueueStats {
    /// Jobs not yet resolved.
    pub fn pending(&self) -> usize {
        self.waiting + self.active + self.delayed + self.paused
    }
}

/// Durable multi-queue scheduler.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn QueueBroker>,
    backoff: Backoff,
    default_max_attempts: u32,
    metrics: MetricsCollector,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, broker: Arc<dyn QueueBroker>) -> Self {
        Self {
            store,
            broker,
            backoff: Backoff::default(),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            metrics: MetricsCollector::new(),
        }
    }

    /// A queue over in-process store and broker.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobStore::new()), Arc::new(MemoryBroker::new()))
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Validates, persists and publishes a job; returns its id.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Uuid, QueueError> {
        let job = self.build_job(request)?;
        let id = job.id;
        let queue = job.queue_name();

        // Persist before publishing so a worker never sees an unknown id.
        self.store.insert(&job).await?;
        let published = if job.is_ready(Utc::now()) {
            self.broker.push(queue, id, job.priority).await
        } else {
            self.broker.push_delayed(queue, id, job.run_at).await
        };
        // The job is durable at this point; resync publishes it later.
        if let Err(e) = published {
            tracing::warn!(job_id = %id, queue, error = %e, "Job persisted but not published");
        }

        tracing::info!(
            job_id = %id,
            queue,
            priority = job.priority,
            max_attempts = job.max_attempts,
            "Job enqueued"
        );
        Ok(id)
    }

    fn build_job(&self, request: EnqueueRequest) -> Result<Job, QueueError> {
        request
            .job_type
            .validate_payload(&request.payload)
            .map_err(|reason| QueueError::InvalidPayload {
                job_type: request.job_type,
                reason,
            })?;

        let max_attempts = request.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::InvalidRequest(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let mut job = Job::new(request.job_type, request.payload).with_max_attempts(max_attempts);
        if let Some(priority) = request.priority {
            job = job.with_priority(priority);
        }
        if let Some(delay_ms) = request.delay_ms.filter(|ms| *ms > 0) {
            job = job.with_delay(Duration::from_millis(delay_ms));
        }
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get(id).await?)
    }

    /// Claims the next ready job of a type, if any.
    ///
    /// The returned job is `Processing` and owned by the caller until it is
    /// passed to [`complete`](Self::complete) or [`fail`](Self::fail).
    pub async fn lease(&self, job_type: JobType) -> Result<Option<Job>, QueueError> {
        let queue = job_type.queue_name();
        if self.broker.is_paused(queue).await? {
            return Ok(None);
        }

        self.promote_due(job_type).await?;

        while let Some(id) = self.broker.pop(queue).await? {
            let claimed = match self.store.try_claim(id, Utc::now()).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    self.hand_back(queue, &[id]).await;
                    return Err(e.into());
                }
            };
            match claimed {
                Some(job) => {
                    tracing::debug!(job_id = %id, queue, attempt = job.attempts + 1, "Job leased");
                    return Ok(Some(job));
                }
                None => {
                    tracing::debug!(job_id = %id, queue, "Skipping unclaimable job");
                }
            }
        }
        Ok(None)
    }

    /// Moves delayed jobs whose time has come back into the waiting set.
    async fn promote_due(&self, job_type: JobType) -> Result<usize, QueueError> {
        let queue = job_type.queue_name();
        let due = self.broker.promote_due(queue, Utc::now()).await?;
        let mut promoted = 0;
        for (idx, id) in due.iter().copied().enumerate() {
            let pushed = match self.store.requeue(id).await {
                Ok(Some(job)) => self
                    .broker
                    .push(queue, id, job.priority)
                    .await
                    .map_err(QueueError::from),
                Ok(None) => {
                    tracing::debug!(job_id = %id, queue, "Delayed job no longer pending");
                    continue;
                }
                Err(e) => Err(e.into()),
            };
            if let Err(e) = pushed {
                self.hand_back(queue, &due[idx..]).await;
                return Err(e);
            }
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Returns ids taken out of the broker to its delayed set, due now.
    ///
    /// The next lease promotes them through the store, which restores their
    /// priority. Failures are logged; resync covers them.
    async fn hand_back(&self, queue: &str, ids: &[Uuid]) {
        let now = Utc::now();
        for id in ids {
            if let Err(e) = self.broker.push_delayed(queue, *id, now).await {
                tracing::error!(
                    job_id = %id,
                    queue,
                    error = %e,
                    "Failed to hand job back to broker; waiting for resync"
                );
            }
        }
    }

    /// Resolves a leased job as completed.
    pub async fn complete(&self, job: &Job, result: serde_json::Value) -> Result<Job, QueueError> {
        let resolved = self
            .store
            .resolve(
                job.id,
                Resolution::Completed {
                    result,
                    at: Utc::now(),
                },
            )
            .await?;

        tracing::info!(job_id = %job.id, queue = job.queue_name(), "Job completed");
        Ok(resolved)
    }

    /// Resolves a failed attempt.
    ///
    /// Retryable errors re-enter the queue after a backoff while attempts
    /// remain; everything else fails the job.
    pub async fn fail(&self, job: &Job, error: &JobError) -> Result<Job, QueueError> {
        let attempts = job.attempts.saturating_add(1).min(job.max_attempts.max(1));
        let queue = job.queue_name();
        let now = Utc::now();

        if error.is_retryable() && attempts < job.max_attempts {
            let delay = self.backoff.delay(attempts);
            let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
            let resolved = self
                .store
                .resolve(
                    job.id,
                    Resolution::Retrying {
                        error: error.to_string(),
                        attempts,
                        retry_at,
                    },
                )
                .await?;
            // The retry is recorded; resync publishes it if this step fails.
            if let Err(e) = self.broker.push_delayed(queue, job.id, retry_at).await {
                tracing::warn!(job_id = %job.id, queue, error = %e, "Retry recorded but not published");
            }

            tracing::warn!(
                job_id = %job.id,
                queue,
                attempt = attempts,
                max_attempts = job.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Job attempt failed, scheduling retry"
            );
            return Ok(resolved);
        }

        let resolved = self
            .store
            .resolve(
                job.id,
                Resolution::Failed {
                    error: error.to_string(),
                    attempts,
                    at: now,
                },
            )
            .await?;

        tracing::error!(
            job_id = %job.id,
            queue,
            attempt = attempts,
            max_attempts = job.max_attempts,
            retryable = error.is_retryable(),
            error = %error,
            "Job failed"
        );
        Ok(resolved)
    }

    /// Persists the latest progress of a running job.
    pub async fn report_progress(&self, id: Uuid, progress: JobProgress) -> Result<(), QueueError> {
        Ok(self.store.update_progress(id, progress).await?)
    }

    /// Fails attempts whose lease has outlived `lease_timeout`.
    ///
    /// Returns how many jobs were recovered.
    pub async fn recover_stale(&self, lease_timeout: Duration) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(lease_timeout).unwrap_or_default();
        let stale = self.store.stale_processing(cutoff).await?;
        let mut recovered = 0;

        for job in stale {
            let error = JobError::transient(format!(
                "Lease expired after {}s without resolution",
                lease_timeout.as_secs()
            ));
            match self.fail(&job, &error).await {
                Ok(_) => recovered += 1,
                // Resolved by its worker in the meantime.
                Err(QueueError::Store(StoreError::InvalidTransition { .. })) => {}
                Err(e) => return Err(e),
            }
        }

        if recovered > 0 {
            tracing::warn!(recovered, "Recovered stale jobs");
        }
        Ok(recovered)
    }

    /// Republishes pending jobs of a type from the store into the broker.
    ///
    /// Needed when the broker lost its state (in-process broker restart or a
    /// flushed Redis) while the store kept the jobs.
    pub async fn resync(&self, job_type: JobType) -> Result<usize, QueueError> {
        let queue = job_type.queue_name();
        let now = Utc::now();
        let mut published = 0;

        for status in [JobStatus::Queued, JobStatus::Retrying] {
            for job in self.store.list(job_type, status, SCAN_LIMIT).await? {
                if status == JobStatus::Queued && job.is_ready(now) {
                    self.broker.push(queue, job.id, job.priority).await?;
                } else {
                    self.broker.push_delayed(queue, job.id, job.run_at).await?;
                }
                published += 1;
            }
        }

        tracing::debug!(queue, published, "Queue resynchronized from store");
        Ok(published)
    }

    /// Deletes terminal jobs finished longer than `retention` ago.
    pub async fn cleanup(&self, retention: Duration) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let deleted = self.store.delete_finished_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, "Cleaned up finished jobs");
        }
        Ok(deleted)
    }

    pub async fn pause(&self, job_type: JobType) -> Result<(), QueueError> {
        self.broker.set_paused(job_type.queue_name(), true).await?;
        tracing::info!(queue = job_type.queue_name(), "Queue paused");
        Ok(())
    }

    pub async fn resume(&self, job_type: JobType) -> Result<(), QueueError> {
        self.broker.set_paused(job_type.queue_name(), false).await?;
        tracing::info!(queue = job_type.queue_name(), "Queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self, job_type: JobType) -> Result<bool, QueueError> {
        Ok(self.broker.is_paused(job_type.queue_name()).await?)
    }

    /// Counts for one queue.
    pub async fn stats(&self, job_type: JobType) -> Result<QueueStats, QueueError> {
        let queue = job_type.queue_name();
        let (depth, counts, paused) = tokio::try_join!(
            async { self.broker.depth(queue).await.map_err(QueueError::from) },
            async { self.store.counts(job_type).await.map_err(QueueError::from) },
            async { self.broker.is_paused(queue).await.map_err(QueueError::from) },
        )?;

        let (waiting, paused) = if paused {
            (0, depth.waiting)
        } else {
            (depth.waiting, 0)
        };
        let stats = QueueStats {
            queue: queue.to_string(),
            waiting,
            active: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            delayed: depth.delayed,
            paused,
        };

        self.metrics.update_queue_depth(queue, "waiting", stats.waiting);
        self.metrics.update_queue_depth(queue, "delayed", stats.delayed);
        self.metrics.update_queue_depth(queue, "paused", stats.paused);
        self.metrics.update_queue_depth(queue, "active", stats.active);
        Ok(stats)
    }

    /// Counts for every queue, in job type order.
    pub async fn all_stats(&self) -> Result<Vec<QueueStats>, QueueError> {
        let mut all = Vec::with_capacity(JobType::ALL.len());
        for job_type in JobType::ALL {
            all.push(self.stats(job_type).await?);
        }
        Ok(all)
    }

    /// Checks that the broker and the store answer.
    pub async fn ping(&self) -> Result<(), QueueError> {
        self.broker.ping().await?;
        self.store.ping().await?;
        Ok(())
    }
}
