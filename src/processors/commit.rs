//! `analyze_commit` handler.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{load_revisions, record_analysis_metrics, ProcessorContext};
use crate::analysis::CommitAnalysis;
use crate::error::JobError;
use crate::llm::ReviewFeedback;
use crate::scheduler::{AnalyzeCommitPayload, Job, JobHandler, ProgressReporter};
use crate::source::{Checkout, CommitInfo};
use crate::storage::{AnalysisKind, AnalysisRecord};

/// Stored result of one commit analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub sha: String,
    pub author: String,
    pub date: chrono::DateTime<chrono::Utc>,
    pub subject: String,
    pub analysis: CommitAnalysis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewFeedback>,
}

impl CommitReport {
    fn new(commit: &CommitInfo, analysis: CommitAnalysis, review: Option<ReviewFeedback>) -> Self {
        Self {
            sha: commit.sha.clone(),
            author: commit.author.clone(),
            date: commit.date,
            subject: commit.subject().to_string(),
            analysis,
            review,
        }
    }
}

/// Analyzes one commit and stores a [`CommitReport`].
pub struct CommitProcessor {
    context: Arc<ProcessorContext>,
}

impl CommitProcessor {
    pub fn new(context: Arc<ProcessorContext>) -> Self {
        Self { context }
    }
}

/// Fetches, analyzes and optionally reviews one commit of an open checkout.
///
/// Progress is reported within `[from, to]`.
pub(crate) async fn analyze_commit(
    context: &ProcessorContext,
    checkout: &dyn Checkout,
    sha: &str,
    review: bool,
    progress: &ProgressReporter,
    (from, to): (u8, u8),
) -> Result<CommitReport, JobError> {
    let commit = checkout.commit(sha).await?;
    let load_end = from + (u16::from(to - from) * 3 / 5) as u8;
    let revisions = load_revisions(
        checkout,
        &commit,
        context.analyzer.diff_parser(),
        progress,
        from,
        load_end,
    )
    .await?;

    let analysis = context.analyzer.analyze(&commit.message, &revisions);
    record_analysis_metrics(&context.metrics, &analysis);
    progress.report(load_end + (to - load_end) / 2, format!("Analyzed {}", short_sha(&commit.sha)));

    let feedback = if review {
        Some(context.reviewer.review(&commit.message, &analysis).await)
    } else {
        None
    };
    progress.report(to, format!("Reviewed {}", short_sha(&commit.sha)));

    Ok(CommitReport::new(&commit, analysis, feedback))
}

pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

#[async_trait]
impl JobHandler for CommitProcessor {
    async fn handle(&self, job: &Job, progress: ProgressReporter) -> Result<serde_json::Value, JobError> {
        let payload: AnalyzeCommitPayload = job.payload_as().map_err(JobError::Permanent)?;
        let started = Instant::now();

        progress.report(5, "Checking out repository");
        let checkout = self.context.source.checkout(&payload.repository).await?;

        let report = analyze_commit(
            &self.context,
            checkout.as_ref(),
            &payload.commit_sha,
            payload.review,
            &progress,
            (10, 90),
        )
        .await?;

        let record = AnalysisRecord::new(
            job.id,
            AnalysisKind::Commit,
            &payload.repository.url,
            &report.sha,
            serde_json::to_value(&report)?,
        );
        let analysis_id = self.context.results.save(&record).await?;
        progress.report(100, "Stored analysis");

        info!(
            job_id = %job.id,
            commit = %short_sha(&report.sha),
            files = report.analysis.files.len(),
            risk = %report.analysis.risk_level,
            duration_ms = started.elapsed().as_millis() as u64,
            "Commit analysis stored"
        );

        Ok(json!({
            "analysis_id": analysis_id,
            "commit": report.sha,
            "files": report.analysis.files.len(),
            "lines_changed": report.analysis.lines_changed,
            "risk_level": report.analysis.risk_level,
            "degraded_files": report.analysis.degraded_files,
            "reviewed": report.review.is_some(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{
        CodeParser, CommitAnalyzer, FileChangeKind, ParsedCodeCache, RiskLevel, RiskThresholds,
    };
    use crate::llm::CommitReviewer;
    use crate::processors::testing::{FixtureRepo, FixtureSource};
    use crate::scheduler::JobType;
    use crate::source::{FileStatus, RepositoryRef};
    use crate::storage::{AnalysisFilter, AnalysisStore, MemoryAnalysisStore};
    use tokio::sync::mpsc;

    const REPO: &str = "https://example.com/acme/app.git";

    const AUTH_V1: &str = "def login(user, password):\n    if not user:\n        return False\n    return check(user, password)\n\ndef _hash(value):\n    return value\n";
    const AUTH_V2: &str = "def login(user, password, otp):\n    if not user:\n        return False\n    if not otp:\n        return False\n    return check(user, password)\n";

    fn fixture() -> FixtureRepo {
        let mut repo = FixtureRepo::default();
        repo.add_commit(
            "a1",
            None,
            "Add auth module",
            &[("src/auth.py", FileStatus::Added, Some(AUTH_V1))],
        );
        repo.add_commit(
            "b2",
            Some("a1"),
            "Require OTP on login\n\nAlso drops the hash helper.",
            &[
                ("src/auth.py", FileStatus::Modified, Some(AUTH_V2)),
                ("README.md", FileStatus::Modified, Some("# App\n")),
            ],
        );
        repo
    }

    fn context(repo: FixtureRepo, results: Arc<MemoryAnalysisStore>) -> Arc<ProcessorContext> {
        Arc::new(ProcessorContext::new(
            FixtureSource::new(repo),
            Arc::new(CommitAnalyzer::new(
                Arc::new(CodeParser::pattern_only()),
                Arc::new(ParsedCodeCache::default()),
                RiskThresholds::default(),
            )),
            Arc::new(CommitReviewer::heuristic_only()),
            results,
        ))
    }

    fn commit_job(sha: &str, review: bool) -> Job {
        Job::from_payload(&AnalyzeCommitPayload {
            repository: RepositoryRef::new(REPO),
            commit_sha: sha.to_string(),
            review,
        })
        .expect("job")
    }

    #[tokio::test]
    async fn test_commit_analysis_is_stored() {
        let results = Arc::new(MemoryAnalysisStore::new());
        let processor = CommitProcessor::new(context(fixture(), results.clone()));
        let job = commit_job("b2", true);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = processor
            .handle(&job, ProgressReporter::new(job.id, tx))
            .await
            .expect("handled");

        assert_eq!(outcome["commit"], "b2");
        assert_eq!(outcome["files"], 2);
        assert_eq!(outcome["reviewed"], true);

        let stored = results
            .find(&AnalysisFilter::for_repository(REPO).with_kind(AnalysisKind::Commit))
            .await
            .expect("find");
        assert_eq!(stored.len(), 1);
        let report: CommitReport = serde_json::from_value(stored[0].data.clone()).expect("report");
        assert_eq!(report.subject, "Require OTP on login");

        let auth = report
            .analysis
            .files
            .iter()
            .find(|f| f.path == "src/auth.py")
            .expect("auth file");
        let removed: Vec<&str> = auth
            .analysis
            .removed_functions
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(removed, vec!["_hash"]);
        assert!(auth
            .analysis
            .modified_functions
            .iter()
            .any(|m| m.name == "login"));

        let review = report.review.expect("review");
        assert!(review.degraded);

        let mut last = 0;
        while let Ok(update) = rx.try_recv() {
            assert!(update.progress.percent >= last);
            last = update.progress.percent;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn test_added_file_has_no_before_snapshot() {
        let results = Arc::new(MemoryAnalysisStore::new());
        let processor = CommitProcessor::new(context(fixture(), results.clone()));
        let job = commit_job("a1", false);

        let outcome = processor
            .handle(&job, ProgressReporter::noop(job.id))
            .await
            .expect("handled");
        assert_eq!(outcome["reviewed"], false);

        let stored = results
            .find(&AnalysisFilter::for_repository(REPO).with_revision("a1"))
            .await
            .expect("find");
        let report: CommitReport = serde_json::from_value(stored[0].data.clone()).expect("report");
        let file = &report.analysis.files[0];
        assert_eq!(file.analysis.added_functions.len(), 2);
        assert_eq!(file.analysis.risk_level, RiskLevel::Low);
        assert!(report.review.is_none());
    }

    const AUTH_DIFF: &str = "\
diff --git a/src/auth.py b/src/auth.py
index 3f1c2aa..9b0d4e1 100644
--- a/src/auth.py
+++ b/src/auth.py
@@ -1,7 +1,6 @@
-def login(user, password):
+def login(user, password, otp):
     if not user:
         return False
+    if not otp:
+        return False
     return check(user, password)
-
-def _hash(value):
-    return value
";

    async fn stored_report(results: &MemoryAnalysisStore, sha: &str) -> CommitReport {
        let stored = results
            .find(&AnalysisFilter::for_repository(REPO).with_revision(sha))
            .await
            .expect("find");
        serde_json::from_value(stored[0].data.clone()).expect("report")
    }

    #[tokio::test]
    async fn test_unreadable_file_is_not_reported_deleted() {
        let mut repo = fixture();
        repo.files.remove(&("b2".to_string(), "src/auth.py".to_string()));
        let results = Arc::new(MemoryAnalysisStore::new());
        let processor = CommitProcessor::new(context(repo, results.clone()));
        let job = commit_job("b2", false);

        processor
            .handle(&job, ProgressReporter::noop(job.id))
            .await
            .expect("handled");

        let report = stored_report(&results, "b2").await;
        let auth = report
            .analysis
            .files
            .iter()
            .find(|f| f.path == "src/auth.py")
            .expect("auth file");
        assert_eq!(auth.status, FileStatus::Modified);
        assert_eq!(auth.analysis.change_kind, FileChangeKind::Unparsed);
        assert_ne!(auth.analysis.risk_level, RiskLevel::High);
        assert!(auth.analysis.removed_functions.is_empty());
        assert!(report.analysis.impact.breaking_changes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_content_is_rebuilt_from_diff() {
        let mut repo = fixture();
        repo.files.remove(&("b2".to_string(), "src/auth.py".to_string()));
        repo.diffs.insert("b2".to_string(), AUTH_DIFF.to_string());
        let results = Arc::new(MemoryAnalysisStore::new());
        let processor = CommitProcessor::new(context(repo, results.clone()));
        let job = commit_job("b2", false);

        processor
            .handle(&job, ProgressReporter::noop(job.id))
            .await
            .expect("handled");

        let report = stored_report(&results, "b2").await;
        let auth = report
            .analysis
            .files
            .iter()
            .find(|f| f.path == "src/auth.py")
            .expect("auth file");
        assert_eq!(auth.analysis.change_kind, FileChangeKind::Modified);
        let removed: Vec<&str> = auth
            .analysis
            .removed_functions
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(removed, vec!["_hash"]);
        assert!(auth
            .analysis
            .modified_functions
            .iter()
            .any(|m| m.name == "login"));
    }

    #[tokio::test]
    async fn test_unknown_commit_is_permanent() {
        let processor = CommitProcessor::new(context(fixture(), Arc::new(MemoryAnalysisStore::new())));
        let job = commit_job("ffff", true);

        let err = processor
            .handle(&job, ProgressReporter::noop(job.id))
            .await
            .expect_err("missing commit");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_transient_source_failure_is_retryable() {
        let mut repo = fixture();
        repo.broken.push("b2".to_string());
        let processor = CommitProcessor::new(context(repo, Arc::new(MemoryAnalysisStore::new())));
        let job = commit_job("b2", true);

        let err = processor
            .handle(&job, ProgressReporter::noop(job.id))
            .await
            .expect_err("broken commit");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_wrong_payload_is_permanent() {
        let processor = CommitProcessor::new(context(fixture(), Arc::new(MemoryAnalysisStore::new())));
        let job = Job::new(JobType::AnalyzeCommit, serde_json::json!({"commit_sha": "b2"}));

        let err = processor
            .handle(&job, ProgressReporter::noop(job.id))
            .await
            .expect_err("invalid payload");
        assert!(matches!(err, JobError::Permanent(_)));
    }

    #[test]
    fn test_short_sha() {
        assert_eq!(short_sha("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_sha("abc"), "abc");
    }
}
