//! Source-data collaborator.
//!
//! The pipeline needs commit metadata, unified diffs and file content at a
//! revision. How they are fetched is behind [`SourceProvider`]; the shipped
//! implementation is [`GitCliSource`], which clones into a per-job temporary
//! directory.

mod git;

pub use git::{GitCliSource, GitCheckout};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Repository coordinates taken from a job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Access token for private repositories. Never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl RepositoryRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: None,
            credential: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// How a file changed in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One file touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub status: FileStatus,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub additions: usize,
    pub deletions: usize,
    pub files_changed: usize,
}

/// Commit metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub parents: Vec<String>,
    pub author: String,
    pub email: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub files: Vec<ChangedFile>,
    pub stats: CommitStats,
}

impl CommitInfo {
    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Read access to one checked-out repository.
///
/// A checkout is owned by a single job; dropping it releases its resources.
#[async_trait]
pub trait Checkout: Send + Sync {
    async fn commit(&self, sha: &str) -> Result<CommitInfo, SourceError>;

    /// Unified diff of a commit against its first parent.
    async fn diff(&self, sha: &str) -> Result<String, SourceError>;

    /// File content at a revision, `None` when the file does not exist there.
    async fn file_at(&self, revision: &str, path: &str) -> Result<Option<String>, SourceError>;

    async fn list_files(&self, revision: &str) -> Result<Vec<String>, SourceError>;

    /// Most recent commit SHAs on the checked-out branch, newest first.
    async fn recent_commits(&self, limit: usize) -> Result<Vec<String>, SourceError>;
}

/// Produces checkouts for repositories.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn checkout(&self, repository: &RepositoryRef) -> Result<Box<dyn Checkout>, SourceError>;
}
