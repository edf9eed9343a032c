//! Job definitions for the scheduler.
//!
//! - `JobType`: closed set of job kinds, each bound to its own queue
//! - `Job`: durable record of one unit of work and its lifecycle
//! - Typed payloads validated at enqueue time

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::RepositoryRef;

/// Default maximum number of attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default priority for jobs (0 is normal priority).
pub const DEFAULT_PRIORITY: i32 = 0;

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    AnalyzeCommit,
    AnalyzeRepository,
    GenerateDocs,
}

impl JobType {
    pub const ALL: [JobType; 3] = [
        JobType::AnalyzeCommit,
        JobType::AnalyzeRepository,
        JobType::GenerateDocs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::AnalyzeCommit => "analyze_commit",
            JobType::AnalyzeRepository => "analyze_repository",
            JobType::GenerateDocs => "generate_docs",
        }
    }

    /// Logical queue the job type is bound to.
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobType::AnalyzeCommit => "commit-analysis",
            JobType::AnalyzeRepository => "repository-analysis",
            JobType::GenerateDocs => "documentation",
        }
    }

    /// Resolves a job type from its queue name.
    pub fn from_queue_name(queue: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.queue_name() == queue)
    }

    /// Checks a payload against this type's schema.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), String> {
        match self {
            JobType::AnalyzeCommit => check::<AnalyzeCommitPayload>(payload),
            JobType::AnalyzeRepository => check::<AnalyzeRepositoryPayload>(payload),
            JobType::GenerateDocs => check::<GenerateDocsPayload>(payload),
        }
    }
}

fn check<P: JobPayload>(payload: &serde_json::Value) -> Result<(), String> {
    P::decode(payload).map(|_| ())
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type '{s}'"))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Failed attempt waiting out its backoff before re-entering the queue.
    Retrying,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Retrying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    /// Completed and Failed are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

/// Latest progress reported by a running handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// 0 to 100.
    pub percent: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

/// A durable unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Higher values are leased sooner.
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be leased.
    pub run_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub progress: Option<JobProgress>,
}

impl Job {
    /// Creates a queued job with default priority and attempts.
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            payload,
            status: JobStatus::Queued,
            priority: DEFAULT_PRIORITY,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: now,
            run_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            progress: None,
        }
    }

    /// Creates a job from a typed payload.
    pub fn from_payload<P: JobPayload>(payload: &P) -> Result<Self, serde_json::Error> {
        Ok(Self::new(P::JOB_TYPE, serde_json::to_value(payload)?))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Defers the first lease by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.run_at = self.created_at + chrono::Duration::from_std(delay).unwrap_or_default();
        self
    }

    pub fn queue_name(&self) -> &'static str {
        self.job_type.queue_name()
    }

    /// Whether another attempt is allowed after the current one fails.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Decodes the payload as the typed payload of this job's type.
    pub fn payload_as<P: JobPayload>(&self) -> Result<P, String> {
        if self.job_type != P::JOB_TYPE {
            return Err(format!(
                "payload of {} job decoded as {}",
                self.job_type,
                P::JOB_TYPE
            ));
        }
        P::decode(&self.payload)
    }
}

/// A typed job payload.
pub trait JobPayload: Serialize + DeserializeOwned {
    const JOB_TYPE: JobType;

    /// Field-level checks beyond the shape.
    fn validate(&self) -> Result<(), String>;

    fn decode(value: &serde_json::Value) -> Result<Self, String> {
        let payload: Self = serde_json::from_value(value.clone())
            .map_err(|e| format!("invalid {} payload: {e}", Self::JOB_TYPE))?;
        payload.validate()?;
        Ok(payload)
    }
}

fn require_repository(repository: &RepositoryRef) -> Result<(), String> {
    if repository.url.trim().is_empty() {
        return Err("repository.url must not be empty".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeCommitPayload {
    pub repository: RepositoryRef,
    pub commit_sha: String,
    /// Whether to ask the LLM reviewer for a summary.
    #[serde(default = "default_true")]
    pub review: bool,
}

impl JobPayload for AnalyzeCommitPayload {
    const JOB_TYPE: JobType = JobType::AnalyzeCommit;

    fn validate(&self) -> Result<(), String> {
        require_repository(&self.repository)?;
        if self.commit_sha.trim().is_empty() {
            return Err("commit_sha must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeRepositoryPayload {
    pub repository: RepositoryRef,
    /// Number of most recent commits to analyze.
    #[serde(default = "default_commit_limit")]
    pub commit_limit: usize,
}

impl JobPayload for AnalyzeRepositoryPayload {
    const JOB_TYPE: JobType = JobType::AnalyzeRepository;

    fn validate(&self) -> Result<(), String> {
        require_repository(&self.repository)?;
        if self.commit_limit == 0 {
            return Err("commit_limit must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateDocsPayload {
    pub repository: RepositoryRef,
    /// Revision to document; the checked-out branch head when absent.
    #[serde(default)]
    pub revision: Option<String>,
}

impl JobPayload for GenerateDocsPayload {
    const JOB_TYPE: JobType = JobType::GenerateDocs;

    fn validate(&self) -> Result<(), String> {
        require_repository(&self.repository)
    }
}

fn default_true() -> bool {
    true
}

fn default_commit_limit() -> usize {
    20
}
