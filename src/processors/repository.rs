//! `analyze_repository` handler.
//!
//! Every commit gets its own stored analysis as it completes. The repository
//! rollup is written last, and only when all commits were analyzed; a partial
//! run fails the job and leaves the previous rollup untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::commit::{analyze_commit, short_sha, CommitReport};
use super::{scaled_percent, ProcessorContext};
use crate::analysis::RiskLevel;
use crate::error::JobError;
use crate::scheduler::{AnalyzeRepositoryPayload, Job, JobHandler, ProgressReporter};
use crate::storage::{AnalysisKind, AnalysisRecord, RepositoryRollup};

/// Commits listed in the rollup's `riskiest_commits`.
const RISKIEST_COMMITS: usize = 5;

/// Aggregate over the analyzed commits of one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRollupData {
    /// Newest commit analyzed.
    pub head: Option<String>,
    pub commits_analyzed: usize,
    pub files_changed: usize,
    pub lines_changed: usize,
    pub complexity_change: i64,
    /// Commit count per risk level.
    pub risk_distribution: BTreeMap<RiskLevel, usize>,
    pub average_maintainability: f64,
    pub breaking_changes: usize,
    pub affected_modules: BTreeSet<String>,
    /// SHAs of the highest-risk commits, riskiest first.
    pub riskiest_commits: Vec<String>,
}

impl RepositoryRollupData {
    pub fn from_reports(reports: &[CommitReport]) -> Self {
        let mut risk_distribution = BTreeMap::new();
        let mut affected_modules = BTreeSet::new();
        for report in reports {
            *risk_distribution
                .entry(report.analysis.risk_level)
                .or_insert(0) += 1;
            affected_modules.extend(report.analysis.impact.affected_modules.iter().cloned());
        }

        let average_maintainability = if reports.is_empty() {
            0.0
        } else {
            reports
                .iter()
                .map(|r| r.analysis.metrics.maintainability_index)
                .sum::<f64>()
                / reports.len() as f64
        };

        // Stable sort keeps newest-first order among equal risks.
        let mut ranked: Vec<&CommitReport> = reports.iter().collect();
        ranked.sort_by(|a, b| {
            b.analysis
                .risk_level
                .cmp(&a.analysis.risk_level)
                .then(b.analysis.lines_changed.cmp(&a.analysis.lines_changed))
        });

        Self {
            head: reports.first().map(|r| r.sha.clone()),
            commits_analyzed: reports.len(),
            files_changed: reports.iter().map(|r| r.analysis.files.len()).sum(),
            lines_changed: reports.iter().map(|r| r.analysis.lines_changed).sum(),
            complexity_change: reports.iter().map(|r| r.analysis.complexity_change).sum(),
            risk_distribution,
            average_maintainability,
            breaking_changes: reports
                .iter()
                .map(|r| r.analysis.impact.breaking_changes.len())
                .sum(),
            affected_modules,
            riskiest_commits: ranked
                .into_iter()
                .take(RISKIEST_COMMITS)
                .map(|r| r.sha.clone())
                .collect(),
        }
    }
}

/// Analyzes the recent history of a branch.
pub struct RepositoryProcessor {
    context: Arc<ProcessorContext>,
}

impl RepositoryProcessor {
    pub fn new(context: Arc<ProcessorContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JobHandler for RepositoryProcessor {
    async fn handle(&self, job: &Job, progress: ProgressReporter) -> Result<serde_json::Value, JobError> {
        let payload: AnalyzeRepositoryPayload = job.payload_as().map_err(JobError::Permanent)?;
        let started = Instant::now();
        let repository = &payload.repository;

        progress.report(2, "Checking out repository");
        let checkout = self.context.source.checkout(repository).await?;
        let shas = checkout.recent_commits(payload.commit_limit).await?;
        progress.report(5, format!("Analyzing {} commits", shas.len()));

        let total = shas.len();
        let mut reports = Vec::with_capacity(total);
        let mut failures: Vec<(String, JobError)> = Vec::new();

        for (idx, sha) in shas.iter().enumerate() {
            let range = (
                scaled_percent(idx, total, 5, 90),
                scaled_percent(idx + 1, total, 5, 90),
            );
            match analyze_commit(&self.context, checkout.as_ref(), sha, false, &progress, range).await {
                Ok(report) => {
                    let record = AnalysisRecord::new(
                        job.id,
                        AnalysisKind::Commit,
                        &repository.url,
                        &report.sha,
                        serde_json::to_value(&report)?,
                    );
                    self.context.results.save(&record).await?;
                    reports.push(report);
                }
                Err(e) => {
                    warn!(job_id = %job.id, commit = %short_sha(sha), error = %e, "Commit analysis failed");
                    failures.push((sha.clone(), e));
                }
            }
        }

        if !failures.is_empty() {
            let summary = failures
                .iter()
                .map(|(sha, e)| format!("{}: {}", short_sha(sha), e))
                .collect::<Vec<_>>()
                .join("; ");
            let message = format!(
                "{} of {} commits failed, rollup not written: {}",
                failures.len(),
                total,
                summary
            );
            return Err(if failures.iter().any(|(_, e)| e.is_retryable()) {
                JobError::Transient(message)
            } else {
                JobError::Permanent(message)
            });
        }

        let rollup = RepositoryRollupData::from_reports(&reports);
        let data = serde_json::to_value(&rollup)?;
        let revision = rollup.head.clone().unwrap_or_else(|| "empty".to_string());

        let analysis_id = self
            .context
            .results
            .save(&AnalysisRecord::new(
                job.id,
                AnalysisKind::Repository,
                &repository.url,
                revision,
                data.clone(),
            ))
            .await?;
        self.context
            .results
            .put_rollup(&RepositoryRollup {
                repository: repository.url.clone(),
                branch: repository.branch.clone(),
                data,
                updated_at: Utc::now(),
            })
            .await?;
        progress.report(100, "Stored repository rollup");

        info!(
            job_id = %job.id,
            commits = rollup.commits_analyzed,
            lines_changed = rollup.lines_changed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Repository analysis stored"
        );

        Ok(json!({
            "analysis_id": analysis_id,
            "commits_analyzed": rollup.commits_analyzed,
            "head": rollup.head,
            "risk_distribution": rollup.risk_distribution,
        }))
    }
}
