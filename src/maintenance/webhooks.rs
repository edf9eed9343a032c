//! Webhook inbox.
//!
//! Push notifications are buffered as they arrive and turned into
//! `analyze_commit` jobs by a scheduled drain, so a burst of pushes never
//! blocks the HTTP handler on queue writes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::{AnalyzeCommitPayload, EnqueueRequest, JobQueue, JobType, QueueError};
use crate::source::RepositoryRef;

/// Default number of events taken per drain.
pub const DEFAULT_DRAIN_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("Invalid push event: {0}")]
    InvalidEvent(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

/// A push to a repository branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repository: RepositoryRef,
    /// Pushed commit SHAs, oldest first.
    pub commits: Vec<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl PushEvent {
    pub fn new(repository: RepositoryRef, commits: Vec<String>) -> Self {
        Self {
            repository,
            commits,
            priority: None,
            received_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), InboxError> {
        if self.repository.url.trim().is_empty() {
            return Err(InboxError::InvalidEvent("repository.url is empty".to_string()));
        }
        if self.commits.is_empty() {
            return Err(InboxError::InvalidEvent("no commits in push".to_string()));
        }
        if self.commits.iter().any(|sha| sha.trim().is_empty()) {
            return Err(InboxError::InvalidEvent("empty commit sha".to_string()));
        }
        Ok(())
    }
}

/// FIFO buffer of push events.
#[async_trait]
pub trait WebhookInbox: Send + Sync {
    async fn push(&self, event: PushEvent) -> Result<(), InboxError>;

    /// Removes up to `max` events, oldest first.
    async fn take(&self, max: usize) -> Result<Vec<PushEvent>, InboxError>;

    async fn len(&self) -> Result<usize, InboxError>;
}

/// In-process inbox.
#[derive(Debug, Default)]
pub struct MemoryInbox {
    events: Mutex<VecDeque<PushEvent>>,
}

impl MemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookInbox for MemoryInbox {
    async fn push(&self, event: PushEvent) -> Result<(), InboxError> {
        event.validate()?;
        self.events
            .lock()
            .expect("inbox lock poisoned")
            .push_back(event);
        Ok(())
    }

    async fn take(&self, max: usize) -> Result<Vec<PushEvent>, InboxError> {
        let mut events = self.events.lock().expect("inbox lock poisoned");
        let n = max.min(events.len());
        Ok(events.drain(..n).collect())
    }

    async fn len(&self) -> Result<usize, InboxError> {
        Ok(self.events.lock().expect("inbox lock poisoned").len())
    }
}

/// Inbox stored in a Redis list (`LPUSH` in, `RPOP` out).
#[derive(Clone)]
pub struct RedisInbox {
    redis: ConnectionManager,
    key: String,
}

impl RedisInbox {
    pub fn new(redis: ConnectionManager, prefix: &str) -> Self {
        Self {
            redis,
            key: format!("{prefix}:webhooks:push"),
        }
    }
}

#[async_trait]
impl WebhookInbox for RedisInbox {
    async fn push(&self, event: PushEvent) -> Result<(), InboxError> {
        event.validate()?;
        let serialized = serde_json::to_string(&event)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.key, serialized).await?;
        Ok(())
    }

    async fn take(&self, max: usize) -> Result<Vec<PushEvent>, InboxError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let raw: Option<Vec<String>> = redis::cmd("RPOP")
            .arg(&self.key)
            .arg(max)
            .query_async(&mut conn)
            .await?;

        let mut events = Vec::new();
        for entry in raw.unwrap_or_default() {
            match serde_json::from_str::<PushEvent>(&entry) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(error = %e, "Dropping malformed webhook event"),
            }
        }
        Ok(events)
    }

    async fn len(&self) -> Result<usize, InboxError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.key).await?;
        Ok(len)
    }
}

/// Moves buffered push events into the commit-analysis queue.
pub struct WebhookDrainer {
    inbox: Arc<dyn WebhookInbox>,
    queue: Arc<JobQueue>,
    batch: usize,
}

impl WebhookDrainer {
    pub fn new(inbox: Arc<dyn WebhookInbox>, queue: Arc<JobQueue>) -> Self {
        Self {
            inbox,
            queue,
            batch: DEFAULT_DRAIN_BATCH,
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Enqueues one job per pushed commit; returns the created job ids.
    ///
    /// When enqueueing fails, the commits not yet enqueued go back into the
    /// inbox for the next drain.
    pub async fn drain(&self) -> Result<Vec<Uuid>, InboxError> {
        let events = self.inbox.take(self.batch).await?;
        let mut created = Vec::new();
        let mut pending = events.into_iter();

        while let Some(mut event) = pending.next() {
            while !event.commits.is_empty() {
                let sha = event.commits[0].clone();
                match self.enqueue_commit(&event, &sha).await {
                    Ok(id) => {
                        created.push(id);
                        event.commits.remove(0);
                    }
                    Err(QueueError::InvalidPayload { reason, .. }) => {
                        tracing::warn!(commit_sha = %sha, reason, "Skipping invalid pushed commit");
                        event.commits.remove(0);
                    }
                    Err(e) => {
                        self.inbox.push(event).await?;
                        for rest in pending {
                            self.inbox.push(rest).await?;
                        }
                        return Err(e.into());
                    }
                }
            }
        }

        if !created.is_empty() {
            tracing::info!(jobs = created.len(), "Drained webhook events into jobs");
        }
        Ok(created)
    }

    async fn enqueue_commit(&self, event: &PushEvent, sha: &str) -> Result<Uuid, QueueError> {
        let payload = AnalyzeCommitPayload {
            repository: event.repository.clone(),
            commit_sha: sha.to_string(),
            review: true,
        };
        let payload = serde_json::to_value(&payload).map_err(|e| QueueError::InvalidPayload {
            job_type: JobType::AnalyzeCommit,
            reason: e.to_string(),
        })?;

        let mut request = EnqueueRequest::new(JobType::AnalyzeCommit, payload);
        if let Some(priority) = event.priority {
            request = request.with_priority(priority);
        }
        self.queue.enqueue(request).await
    }
}
