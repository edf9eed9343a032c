//! Job handlers.
//!
//! Each handler owns one job type and runs the control flow
//! checkout → fetch → analyze → review → persist:
//!
//! - [`CommitProcessor`]: one commit, optional LLM review
//! - [`RepositoryProcessor`]: the most recent commits of a branch plus a rollup
//! - [`DocsProcessor`]: per-file outline of a revision plus an overview
//!
//! All three share a [`ProcessorContext`] built once at startup.

mod commit;
mod docs;
mod repository;

pub use commit::{CommitProcessor, CommitReport};
pub use docs::{DocsProcessor, DocumentationReport, FileOutline};
pub use repository::{RepositoryProcessor, RepositoryRollupData};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::analysis::{
    CommitAnalysis, CommitAnalyzer, DiffFile, DiffParser, FileRevision, Language,
};
use crate::error::JobError;
use crate::llm::CommitReviewer;
use crate::metrics::{FallbackKind, MetricsCollector};
use crate::scheduler::{HandlerRegistry, JobType, ProgressReporter};
use crate::source::{Checkout, CommitInfo, FileStatus, SourceProvider};
use crate::storage::AnalysisStore;

/// Collaborators shared by every handler.
pub struct ProcessorContext {
    pub source: Arc<dyn SourceProvider>,
    pub analyzer: Arc<CommitAnalyzer>,
    pub reviewer: Arc<CommitReviewer>,
    pub results: Arc<dyn AnalysisStore>,
    pub metrics: MetricsCollector,
}

impl ProcessorContext {
    pub fn new(
        source: Arc<dyn SourceProvider>,
        analyzer: Arc<CommitAnalyzer>,
        reviewer: Arc<CommitReviewer>,
        results: Arc<dyn AnalysisStore>,
    ) -> Self {
        Self {
            source,
            analyzer,
            reviewer,
            results,
            metrics: MetricsCollector::new(),
        }
    }
}

/// Registry with a handler for every job type.
pub fn handler_registry(context: Arc<ProcessorContext>) -> HandlerRegistry {
    HandlerRegistry::new()
        .register(
            JobType::AnalyzeCommit,
            Arc::new(CommitProcessor::new(context.clone())),
        )
        .register(
            JobType::AnalyzeRepository,
            Arc::new(RepositoryProcessor::new(context.clone())),
        )
        .register(JobType::GenerateDocs, Arc::new(DocsProcessor::new(context)))
}

/// Maps `step` of `total` onto the `[from, to]` percent range.
pub(crate) fn scaled_percent(step: usize, total: usize, from: u8, to: u8) -> u8 {
    if total == 0 || to <= from {
        return to;
    }
    let span = usize::from(to - from);
    let offset = span * step.min(total) / total;
    from + offset as u8
}

/// Loads both revisions of every file a commit touched.
///
/// Content is fetched only for files in a supported language; other files
/// still count towards the commit's size and risk. When a side that should
/// exist cannot be read at its revision, it is rebuilt from the commit's diff
/// hunks. A side that is still missing after that leaves the file without
/// content on either side, so an unreadable file is never taken for a
/// deletion or an addition.
pub(crate) async fn load_revisions(
    checkout: &dyn Checkout,
    commit: &CommitInfo,
    diff_parser: &DiffParser,
    progress: &ProgressReporter,
    from: u8,
    to: u8,
) -> Result<Vec<FileRevision>, JobError> {
    let parent = commit.parents.first().map(String::as_str);
    let total = commit.files.len();
    let mut revisions = Vec::with_capacity(total);
    let mut diff: Option<Vec<DiffFile>> = None;

    for (idx, file) in commit.files.iter().enumerate() {
        let previous_path = file.old_path.as_deref().unwrap_or(&file.path);
        let supported = Language::from_path(&file.path).is_some()
            || Language::from_path(previous_path).is_some();
        let wants_before = supported && parent.is_some() && file.status != FileStatus::Added;
        let wants_after = supported && file.status != FileStatus::Deleted;

        let before = match parent {
            Some(parent) if wants_before => checkout.file_at(parent, previous_path).await?,
            _ => None,
        };
        let after = if wants_after {
            checkout.file_at(&commit.sha, &file.path).await?
        } else {
            None
        };

        let mut revision = FileRevision {
            path: file.path.clone(),
            old_path: file.old_path.clone(),
            status: file.status,
            before,
            after,
            additions: file.additions,
            deletions: file.deletions,
        };

        let missing = |r: &FileRevision| {
            (wants_before && r.before.is_none()) || (wants_after && r.after.is_none())
        };
        if missing(&revision) {
            if diff.is_none() {
                diff = Some(diff_parser.parse(&checkout.diff(&commit.sha).await?));
            }
            if let Some(section) = diff
                .iter()
                .flatten()
                .find(|d| {
                    d.new_path.as_deref() == Some(file.path.as_str()) || d.file_name == file.path
                })
            {
                revision.fill_from_diff(section);
            }
            if missing(&revision) {
                warn!(
                    commit = %commit.sha,
                    file = %file.path,
                    "File content unavailable at its revision; skipping structural comparison"
                );
                revision.before = None;
                revision.after = None;
            } else {
                debug!(commit = %commit.sha, file = %file.path, "Rebuilt file content from diff");
            }
        }

        revisions.push(revision);
        progress.report(
            scaled_percent(idx + 1, total, from, to),
            format!("Loaded {}", file.path),
        );
    }

    Ok(revisions)
}

/// Records per-file quality scores and parse fallbacks.
pub(crate) fn record_analysis_metrics(metrics: &MetricsCollector, analysis: &CommitAnalysis) {
    for file in &analysis.files {
        if let Some(file_metrics) = &file.metrics {
            metrics.record_quality(file_metrics.quality_score);
        }
    }
    metrics.record_fallback(FallbackKind::Parse, analysis.degraded_files.len());
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory source collaborator for handler tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::error::SourceError;
    use crate::source::{
        ChangedFile, Checkout, CommitInfo, CommitStats, FileStatus, RepositoryRef, SourceProvider,
    };

    /// A repository whose commits and files are held in maps.
    #[derive(Debug, Default, Clone)]
    pub struct FixtureRepo {
        /// Newest first.
        pub history: Vec<String>,
        pub commits: HashMap<String, CommitInfo>,
        /// `(revision, path)` → content.
        pub files: HashMap<(String, String), String>,
        /// SHAs whose lookup fails transiently.
        pub broken: Vec<String>,
        /// Unified diff per SHA; known commits without one diff as empty.
        pub diffs: HashMap<String, String>,
    }

    impl FixtureRepo {
        pub fn add_commit(
            &mut self,
            sha: &str,
            parent: Option<&str>,
            message: &str,
            changes: &[(&str, FileStatus, Option<&str>)],
        ) {
            let mut files = Vec::new();
            for (path, status, content) in changes {
                if let Some(content) = content {
                    self.files
                        .insert((sha.to_string(), path.to_string()), content.to_string());
                }
                files.push(ChangedFile {
                    path: path.to_string(),
                    old_path: None,
                    status: *status,
                    additions: content.map_or(0, |c| c.lines().count()),
                    deletions: 0,
                });
            }
            // Carry unchanged files forward so `file_at(parent, ..)` keeps working.
            if let Some(parent) = parent {
                let inherited: Vec<((String, String), String)> = self
                    .files
                    .iter()
                    .filter(|((rev, path), _)| {
                        rev == parent && !changes.iter().any(|(p, _, _)| p == path)
                    })
                    .map(|((_, path), content)| ((sha.to_string(), path.clone()), content.clone()))
                    .collect();
                self.files.extend(inherited);
            }

            let stats = CommitStats {
                additions: files.iter().map(|f| f.additions).sum(),
                deletions: 0,
                files_changed: files.len(),
            };
            self.commits.insert(
                sha.to_string(),
                CommitInfo {
                    sha: sha.to_string(),
                    parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
                    author: "Dev".to_string(),
                    email: "dev@example.com".to_string(),
                    date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date"),
                    message: message.to_string(),
                    files,
                    stats,
                },
            );
            self.history.insert(0, sha.to_string());
        }
    }

    #[async_trait]
    impl Checkout for FixtureRepo {
        async fn commit(&self, sha: &str) -> Result<CommitInfo, SourceError> {
            if self.broken.iter().any(|b| b == sha) {
                return Err(SourceError::CommandFailed {
                    command: "show".to_string(),
                    message: "connection reset".to_string(),
                });
            }
            let sha = if sha == "HEAD" {
                self.history.first().map(String::as_str).unwrap_or(sha)
            } else {
                sha
            };
            self.commits
                .get(sha)
                .cloned()
                .ok_or_else(|| SourceError::RevisionNotFound(sha.to_string()))
        }

        async fn diff(&self, sha: &str) -> Result<String, SourceError> {
            let commit = self.commit(sha).await?;
            Ok(self.diffs.get(&commit.sha).cloned().unwrap_or_default())
        }

        async fn file_at(&self, revision: &str, path: &str) -> Result<Option<String>, SourceError> {
            let revision = if revision == "HEAD" {
                self.history.first().cloned().unwrap_or_default()
            } else {
                revision.to_string()
            };
            Ok(self.files.get(&(revision, path.to_string())).cloned())
        }

        async fn list_files(&self, revision: &str) -> Result<Vec<String>, SourceError> {
            let commit = self.commit(revision).await?;
            let mut paths: Vec<String> = self
                .files
                .keys()
                .filter(|(rev, _)| *rev == commit.sha)
                .map(|(_, path)| path.clone())
                .collect();
            paths.sort();
            Ok(paths)
        }

        async fn recent_commits(&self, limit: usize) -> Result<Vec<String>, SourceError> {
            Ok(self.history.iter().take(limit).cloned().collect())
        }
    }

    /// Hands out clones of one fixture and counts checkouts.
    #[derive(Debug, Default)]
    pub struct FixtureSource {
        pub repo: FixtureRepo,
        pub checkouts: AtomicUsize,
    }

    impl FixtureSource {
        pub fn new(repo: FixtureRepo) -> Arc<Self> {
            Arc::new(Self {
                repo,
                checkouts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceProvider for FixtureSource {
        async fn checkout(&self, repository: &RepositoryRef) -> Result<Box<dyn Checkout>, SourceError> {
            if repository.url.contains("missing") {
                return Err(SourceError::InvalidRepository(repository.url.clone()));
            }
            self.checkouts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(self.repo.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_percent() {
        assert_eq!(scaled_percent(0, 4, 20, 60), 20);
        assert_eq!(scaled_percent(2, 4, 20, 60), 40);
        assert_eq!(scaled_percent(4, 4, 20, 60), 60);
        assert_eq!(scaled_percent(9, 4, 20, 60), 60);
        assert_eq!(scaled_percent(0, 0, 20, 60), 60);
    }

    #[test]
    fn test_registry_covers_every_job_type() {
        use crate::analysis::{CodeParser, ParsedCodeCache, RiskThresholds};
        use crate::storage::MemoryAnalysisStore;

        let context = Arc::new(ProcessorContext::new(
            testing::FixtureSource::new(testing::FixtureRepo::default()),
            Arc::new(CommitAnalyzer::new(
                Arc::new(CodeParser::pattern_only()),
                Arc::new(ParsedCodeCache::default()),
                RiskThresholds::default(),
            )),
            Arc::new(CommitReviewer::heuristic_only()),
            Arc::new(MemoryAnalysisStore::new()),
        ));
        let registry = handler_registry(context);
        assert_eq!(registry.job_types(), JobType::ALL.to_vec());
    }
}
