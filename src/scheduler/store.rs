//! Durable job records.
//!
//! The store is the source of truth for job state. Every lifecycle transition
//! is a compare-and-set on the current status, so two workers can never both
//! claim a job and a stale resolution never overwrites a newer one.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::job::{Job, JobProgress, JobStatus, JobType};

/// Errors raised by job stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} already exists")]
    Duplicate { id: Uuid },

    #[error("Job {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Terminal or retry outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Completed {
        result: serde_json::Value,
        at: DateTime<Utc>,
    },
    Retrying {
        error: String,
        attempts: u32,
        retry_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        attempts: u32,
        at: DateTime<Utc>,
    },
}

impl Resolution {
    pub fn status(&self) -> JobStatus {
        match self {
            Resolution::Completed { .. } => JobStatus::Completed,
            Resolution::Retrying { .. } => JobStatus::Retrying,
            Resolution::Failed { .. } => JobStatus::Failed,
        }
    }

    /// Applies the resolution to a processing job record.
    pub fn apply(&self, job: &mut Job) {
        match self {
            Resolution::Completed { result, at } => {
                job.status = JobStatus::Completed;
                job.result = Some(result.clone());
                job.completed_at = Some(*at);
                job.error = None;
            }
            Resolution::Retrying {
                error,
                attempts,
                retry_at,
            } => {
                job.status = JobStatus::Retrying;
                job.attempts = *attempts;
                job.error = Some(error.clone());
                job.run_at = *retry_at;
            }
            Resolution::Failed { error, attempts, at } => {
                job.status = JobStatus::Failed;
                job.attempts = *attempts;
                job.error = Some(error.clone());
                job.completed_at = Some(*at);
            }
        }
    }
}

/// Number of jobs per status for one job type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus, count: usize) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Retrying => self.retrying += count,
        }
    }
}

/// Persistence of job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Atomically moves a `Queued` job to `Processing`.
    ///
    /// Returns `None` when the job is missing or not queued; exactly one
    /// concurrent caller wins for a given job.
    async fn try_claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Job>, StoreError>;

    /// Moves a `Retrying` (or delayed `Queued`) job back to `Queued`.
    ///
    /// Returns `None` when the job is in any other state.
    async fn requeue(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Resolves a `Processing` job.
    async fn resolve(&self, id: Uuid, resolution: Resolution) -> Result<Job, StoreError>;

    /// Records progress on a `Processing` job; ignored in other states.
    async fn update_progress(&self, id: Uuid, progress: JobProgress) -> Result<(), StoreError>;

    /// Jobs of a type in one status, oldest first.
    async fn list(
        &self,
        job_type: JobType,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// `Processing` jobs started before `cutoff`.
    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    /// Deletes terminal jobs finished before `cutoff`; returns how many.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn counts(&self, job_type: JobType) -> Result<StatusCounts, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process job store.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("job store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate { id: job.id });
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .expect("job store lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn try_claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                job.progress = None;
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn requeue(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        match jobs.get_mut(&id) {
            Some(job) if matches!(job.status, JobStatus::Retrying | JobStatus::Queued) => {
                job.status = JobStatus::Queued;
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn resolve(&self, id: Uuid, resolution: Resolution) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::InvalidTransition {
                id,
                expected: JobStatus::Processing,
                actual: job.status,
            });
        }
        resolution.apply(job);
        Ok(job.clone())
    }

    async fn update_progress(&self, id: Uuid, progress: JobProgress) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        if let Some(job) = jobs.get_mut(&id).filter(|j| j.status == JobStatus::Processing) {
            job.progress = Some(progress);
        }
        Ok(())
    }

    async fn list(
        &self,
        job_type: JobType,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.job_type == job_type && j.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.created_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .filter(|j| j.started_at.is_some_and(|started| started < cutoff))
            .cloned()
            .collect())
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        let before = jobs.len();
        jobs.retain(|_, j| {
            !(j.status.is_terminal() && j.completed_at.is_some_and(|done| done < cutoff))
        });
        Ok(before - jobs.len())
    }

    async fn counts(&self, job_type: JobType) -> Result<StatusCounts, StoreError> {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        let mut counts = StatusCounts::default();
        for job in jobs.values().filter(|j| j.job_type == job_type) {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn job() -> Job {
        Job::new(JobType::AnalyzeCommit, json!({}))
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryJobStore::new();
        let job = job();
        store.insert(&job).await.expect("insert");

        let first = store.try_claim(job.id, Utc::now()).await.expect("claim");
        let second = store.try_claim(job.id, Utc::now()).await.expect("claim");
        assert!(first.is_some());
        assert!(second.is_none());

        let claimed = first.expect("claimed");
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 0);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryJobStore::new());
        let job = job();
        store.insert(&job).await.expect("insert");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.try_claim(job.id, Utc::now()).await.expect("claim").is_some()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryJobStore::new();
        let job = job();
        store.insert(&job).await.expect("insert");
        assert!(matches!(
            store.insert(&job).await,
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_requires_processing() {
        let store = MemoryJobStore::new();
        let job = job();
        store.insert(&job).await.expect("insert");

        let resolution = Resolution::Completed {
            result: json!({"ok": true}),
            at: Utc::now(),
        };
        assert!(matches!(
            store.resolve(job.id, resolution.clone()).await,
            Err(StoreError::InvalidTransition { .. })
        ));

        store.try_claim(job.id, Utc::now()).await.expect("claim");
        let done = store.resolve(job.id, resolution.clone()).await.expect("resolve");
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(json!({"ok": true})));

        // Terminal jobs are immutable.
        assert!(store.resolve(job.id, resolution).await.is_err());
    }

    #[tokio::test]
    async fn test_retry_cycle() {
        let store = MemoryJobStore::new();
        let job = job();
        store.insert(&job).await.expect("insert");
        store.try_claim(job.id, Utc::now()).await.expect("claim");

        let retry_at = Utc::now() + chrono::Duration::seconds(5);
        let retrying = store
            .resolve(
                job.id,
                Resolution::Retrying {
                    error: "timeout".to_string(),
                    attempts: 1,
                    retry_at,
                },
            )
            .await
            .expect("resolve");
        assert_eq!(retrying.status, JobStatus::Retrying);
        assert_eq!(retrying.attempts, 1);
        assert_eq!(retrying.run_at, retry_at);

        assert!(store.try_claim(job.id, Utc::now()).await.expect("claim").is_none());
        let requeued = store.requeue(job.id).await.expect("requeue").expect("job");
        assert_eq!(requeued.status, JobStatus::Queued);
        assert!(store.try_claim(job.id, Utc::now()).await.expect("claim").is_some());
    }

    #[tokio::test]
    async fn test_progress_only_while_processing() {
        let store = MemoryJobStore::new();
        let job = job();
        store.insert(&job).await.expect("insert");
        let progress = JobProgress {
            percent: 40,
            message: "parsing".to_string(),
            updated_at: Utc::now(),
        };

        store.update_progress(job.id, progress.clone()).await.expect("progress");
        assert!(store.get(job.id).await.expect("get").expect("job").progress.is_none());

        store.try_claim(job.id, Utc::now()).await.expect("claim");
        store.update_progress(job.id, progress.clone()).await.expect("progress");
        assert_eq!(
            store.get(job.id).await.expect("get").expect("job").progress,
            Some(progress)
        );
    }

    #[tokio::test]
    async fn test_cleanup_and_counts() {
        let store = MemoryJobStore::new();
        let old = job();
        let fresh = job();
        let waiting = job();
        for j in [&old, &fresh, &waiting] {
            store.insert(j).await.expect("insert");
        }
        let long_ago = Utc::now() - chrono::Duration::days(30);
        for (j, at) in [(&old, long_ago), (&fresh, Utc::now())] {
            store.try_claim(j.id, at).await.expect("claim");
            store
                .resolve(
                    j.id,
                    Resolution::Completed {
                        result: json!(null),
                        at,
                    },
                )
                .await
                .expect("resolve");
        }

        let counts = store.counts(JobType::AnalyzeCommit).await.expect("counts");
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.queued, 1);

        let deleted = store
            .delete_finished_before(Utc::now() - chrono::Duration::days(7))
            .await
            .expect("cleanup");
        assert_eq!(deleted, 1);
        assert!(store.get(old.id).await.expect("get").is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_processing() {
        let store = MemoryJobStore::new();
        let job = job();
        store.insert(&job).await.expect("insert");
        let started = Utc::now() - chrono::Duration::minutes(30);
        store.try_claim(job.id, started).await.expect("claim");

        let stale = store
            .stale_processing(Utc::now() - chrono::Duration::minutes(10))
            .await
            .expect("stale");
        assert_eq!(stale.len(), 1);
        let fresh = store
            .stale_processing(Utc::now() - chrono::Duration::hours(1))
            .await
            .expect("stale");
        assert!(fresh.is_empty());
    }
}
