//! Error types shared across subsystems.
//!
//! Defines the collaborator errors and the job execution error:
//! - Source-data access (git checkouts, commit lookups)
//! - LLM API interactions
//! - Job handler outcomes and their retry classification
//!
//! Subsystem-local errors (`QueueError`, `StoreError`, `PoolError`,
//! `StorageError`, `ConfigError`, `ScheduleError`, `ParseError`) live next to
//! the code that raises them.

use std::time::Duration;

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while reading source data.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Invalid repository reference: {0}")]
    InvalidRepository(String),

    #[error("Revision '{0}' not found")]
    RevisionNotFound(String),

    #[error("git {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Unexpected git output: {0}")]
    UnexpectedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::CommandFailed { .. } | SourceError::Io(_))
    }
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500,
            LlmError::MissingApiBase | LlmError::ParseError(_) => false,
        }
    }
}

/// Outcome of a failed job execution.
///
/// The variant decides whether the job re-enters the queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// Infrastructure failure (network, rate limit, broker); retried.
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot change the outcome (bad payload, missing data).
    #[error("{0}")]
    Permanent(String),

    /// The handler exceeded its deadline; retried.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),
}

impl JobError {
    pub fn transient(message: impl Into<String>) -> Self {
        JobError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        JobError::Permanent(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobError::Permanent(_))
    }
}

impl From<SourceError> for JobError {
    fn from(err: SourceError) -> Self {
        if err.is_transient() {
            JobError::Transient(err.to_string())
        } else {
            JobError::Permanent(err.to_string())
        }
    }
}

impl From<LlmError> for JobError {
    fn from(err: LlmError) -> Self {
        if err.is_transient() {
            JobError::Transient(err.to_string())
        } else {
            JobError::Permanent(err.to_string())
        }
    }
}

impl From<StorageError> for JobError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => JobError::Permanent(format!("Record not found: {what}")),
            other => JobError::Transient(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Permanent(format!("Invalid payload: {err}"))
    }
}
