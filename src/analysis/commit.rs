//! Commit-level analysis: runs the parser, diff analyzer, metrics and impact
//! assessor over every file a commit touches.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache::ParsedCodeCache;
use super::code_parser::{CodeParser, StrategyUsed};
use super::diff_analyzer::{DiffAnalysis, DiffAnalyzer, RiskLevel, RiskThresholds};
use super::diff_parser::{DiffFile, DiffLineKind, DiffParser};
use super::impact::{ImpactAssessment, ImpactAssessor};
use super::language::Language;
use super::metrics::{AggregateMetrics, FileMetrics, MetricsCalculator};
use super::parsed::ParsedCode;
use crate::source::FileStatus;

/// Both revisions of one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRevision {
    pub path: String,
    pub old_path: Option<String>,
    pub status: FileStatus,
    /// Content before the commit, `None` when the file did not exist.
    pub before: Option<String>,
    /// Content after the commit, `None` when the file was deleted.
    pub after: Option<String>,
    pub additions: usize,
    pub deletions: usize,
}

impl FileRevision {
    /// Builds a revision from a diff section alone.
    ///
    /// Contents are reconstructed from the hunks, so they only cover the
    /// changed regions and their context.
    pub fn from_diff(file: &DiffFile) -> Self {
        let status = diff_status(file);
        let mut revision = Self {
            path: file
                .new_path
                .clone()
                .unwrap_or_else(|| file.file_name.clone()),
            old_path: file.is_renamed.then(|| file.previous_path().to_string()),
            status,
            before: None,
            after: None,
            additions: file.additions.len(),
            deletions: file.deletions.len(),
        };
        revision.fill_from_diff(file);
        revision
    }

    /// Fills missing contents from the diff hunks.
    pub fn fill_from_diff(&mut self, file: &DiffFile) {
        if file.is_binary || file.chunks.is_empty() {
            return;
        }
        if self.before.is_none() && self.status != FileStatus::Added {
            self.before = Some(reconstruct(file, DiffLineKind::Add));
        }
        if self.after.is_none() && self.status != FileStatus::Deleted {
            self.after = Some(reconstruct(file, DiffLineKind::Delete));
        }
    }

    /// Path of the file before the commit.
    pub fn previous_path(&self) -> &str {
        self.old_path.as_deref().unwrap_or(&self.path)
    }
}

fn diff_status(file: &DiffFile) -> FileStatus {
    if file.is_new {
        FileStatus::Added
    } else if file.is_deleted {
        FileStatus::Deleted
    } else if file.is_renamed {
        FileStatus::Renamed
    } else {
        FileStatus::Modified
    }
}

/// Joins every hunk line except those of the `skip` kind.
fn reconstruct(file: &DiffFile, skip: DiffLineKind) -> String {
    let mut out = String::new();
    for line in file.chunks.iter().flat_map(|c| &c.lines) {
        if line.kind != skip {
            out.push_str(&line.content);
            out.push('\n');
        }
    }
    out
}

/// Analysis of one changed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedFileAnalysis {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub status: FileStatus,
    pub language: Option<Language>,
    pub additions: usize,
    pub deletions: usize,
    pub analysis: DiffAnalysis,
    /// Metrics of the newest available snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<FileMetrics>,
    /// Strategy that parsed the newest snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<StrategyUsed>,
}

impl ChangedFileAnalysis {
    pub fn lines_changed(&self) -> usize {
        self.additions + self.deletions
    }
}

/// Analysis of a whole commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitAnalysis {
    pub files: Vec<ChangedFileAnalysis>,
    /// Aggregate over the post-commit snapshots.
    pub metrics: AggregateMetrics,
    pub complexity_change: i64,
    pub lines_changed: usize,
    pub risk_level: RiskLevel,
    pub impact: ImpactAssessment,
    /// Files parsed by the pattern parser after the structural parser failed.
    pub degraded_files: Vec<String>,
}

/// Runs the analysis engine over a commit's files.
pub struct CommitAnalyzer {
    parser: Arc<CodeParser>,
    cache: Arc<ParsedCodeCache>,
    diff_parser: DiffParser,
    diff_analyzer: DiffAnalyzer,
    impact: ImpactAssessor,
    metrics: MetricsCalculator,
}

impl CommitAnalyzer {
    pub fn new(parser: Arc<CodeParser>, cache: Arc<ParsedCodeCache>, thresholds: RiskThresholds) -> Self {
        Self {
            parser,
            cache,
            diff_parser: DiffParser::new(),
            diff_analyzer: DiffAnalyzer::new(thresholds),
            impact: ImpactAssessor::new(),
            metrics: MetricsCalculator::new(),
        }
    }

    pub fn parser(&self) -> &CodeParser {
        &self.parser
    }

    pub fn cache(&self) -> &ParsedCodeCache {
        &self.cache
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        self.diff_analyzer.thresholds()
    }

    pub fn diff_parser(&self) -> &DiffParser {
        &self.diff_parser
    }

    pub fn metrics(&self) -> &MetricsCalculator {
        &self.metrics
    }

    /// Parses one file through the shared cache.
    pub fn parse_file(&self, content: &str, path: &str) -> Option<(ParsedCode, StrategyUsed)> {
        self.cache
            .get_or_parse_with_strategy(&self.parser, content, path)
    }

    /// Analyzes a commit from its message and file revisions.
    pub fn analyze(&self, commit_message: &str, revisions: &[FileRevision]) -> CommitAnalysis {
        let mut files = Vec::with_capacity(revisions.len());
        let mut snapshots = Vec::new();
        let mut degraded_files = Vec::new();

        for revision in revisions {
            let (file, after, degraded) = self.analyze_file(revision);
            if degraded {
                degraded_files.push(file.path.clone());
            }
            if let Some(after) = after {
                snapshots.push(after);
            }
            files.push(file);
        }

        let lines_changed: usize = files.iter().map(ChangedFileAnalysis::lines_changed).sum();
        let risks: Vec<RiskLevel> = files.iter().map(|f| f.analysis.risk_level).collect();
        let risk_level = self
            .thresholds()
            .commit_risk(files.len(), lines_changed, &risks);
        let impact = self.impact.assess(commit_message, &files);

        debug!(
            files = files.len(),
            lines_changed,
            risk = %risk_level,
            "Commit analyzed"
        );

        CommitAnalysis {
            complexity_change: files.iter().map(|f| f.analysis.complexity_change).sum(),
            metrics: self.metrics.aggregate(&snapshots),
            lines_changed,
            risk_level,
            impact,
            degraded_files,
            files,
        }
    }

    /// Analyzes a unified diff without access to full file contents.
    pub fn analyze_diff(&self, commit_message: &str, diff_text: &str) -> CommitAnalysis {
        let revisions: Vec<FileRevision> = self
            .diff_parser
            .parse(diff_text)
            .iter()
            .map(FileRevision::from_diff)
            .collect();
        self.analyze(commit_message, &revisions)
    }

    fn analyze_file(&self, revision: &FileRevision) -> (ChangedFileAnalysis, Option<ParsedCode>, bool) {
        let before = revision
            .before
            .as_deref()
            .and_then(|content| self.parse_file(content, revision.previous_path()));
        let after = revision
            .after
            .as_deref()
            .and_then(|content| self.parse_file(content, &revision.path));

        let degraded = [&before, &after]
            .iter()
            .any(|p| matches!(p, Some((_, StrategyUsed::Fallback))));
        if degraded {
            warn!(file = %revision.path, "Structural parse unavailable, used pattern fallback");
        }

        let analysis = self
            .diff_analyzer
            .analyze(before.as_ref().map(|(p, _)| p), after.as_ref().map(|(p, _)| p));

        let newest = after.as_ref().or(before.as_ref());
        let file = ChangedFileAnalysis {
            path: revision.path.clone(),
            old_path: revision.old_path.clone(),
            status: revision.status,
            language: Language::from_path(&revision.path),
            additions: revision.additions,
            deletions: revision.deletions,
            analysis,
            metrics: newest.map(|(p, _)| self.metrics.file_metrics(p)),
            parser: newest.map(|(_, s)| *s),
        };
        (file, after.map(|(p, _)| p), degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::diff_analyzer::FileChangeKind;
    use crate::analysis::code_parser::{ParseError, ParsingStrategy};

    fn analyzer() -> CommitAnalyzer {
        CommitAnalyzer::new(
            Arc::new(CodeParser::pattern_only()),
            Arc::new(ParsedCodeCache::default()),
            RiskThresholds::default(),
        )
    }

    fn revision(path: &str, before: Option<&str>, after: Option<&str>, lines: usize) -> FileRevision {
        let status = match (before, after) {
            (None, _) => FileStatus::Added,
            (_, None) => FileStatus::Deleted,
            _ => FileStatus::Modified,
        };
        FileRevision {
            path: path.to_string(),
            old_path: None,
            status,
            before: before.map(str::to_string),
            after: after.map(str::to_string),
            additions: lines,
            deletions: 0,
        }
    }

    const DIFF: &str = "\
diff --git a/app/util.py b/app/util.py
index 1111111..2222222 100644
--- a/app/util.py
+++ b/app/util.py
@@ -1,2 +1,7 @@
 def load(path):
-    return open(path).read()
+    if path:
+        return open(path).read()
+    return None
+
+def save_token(token):
+    pass
diff --git a/app/new.py b/app/new.py
new file mode 100644
--- /dev/null
+++ b/app/new.py
@@ -0,0 +1,2 @@
+def fresh():
+    return 1
";

    #[test]
    fn test_from_diff_reconstructs_both_sides() {
        let files = DiffParser::new().parse(DIFF);
        let modified = FileRevision::from_diff(&files[0]);
        assert_eq!(modified.status, FileStatus::Modified);
        let before = modified.before.expect("before");
        let after = modified.after.expect("after");
        assert!(before.contains("return open(path).read()"));
        assert!(!before.contains("save_token"));
        assert!(after.contains("def save_token(token):"));

        let added = FileRevision::from_diff(&files[1]);
        assert_eq!(added.status, FileStatus::Added);
        assert!(added.before.is_none());
        assert_eq!(added.additions, 2);
    }

    #[test]
    fn test_analyze_diff() {
        let analysis = analyzer().analyze_diff("Add token storage", DIFF);

        assert_eq!(analysis.files.len(), 2);
        let util = &analysis.files[0];
        assert_eq!(util.analysis.change_kind, FileChangeKind::Modified);
        assert_eq!(util.analysis.added_functions.len(), 1);
        assert_eq!(util.analysis.added_functions[0].name, "save_token");
        assert_eq!(analysis.files[1].analysis.change_kind, FileChangeKind::Added);
        assert_eq!(analysis.impact.security_impact.risk_level, RiskLevel::Medium);
        assert!(analysis.impact.affected_modules.contains("app"));
        assert!(analysis.degraded_files.is_empty());
    }

    #[test]
    fn test_large_commit_is_high_risk() {
        let revisions: Vec<FileRevision> = (0..11)
            .map(|i| revision(&format!("src/f{i}.rs"), Some("fn a() {}\n"), Some("fn a() {}\n"), 55))
            .collect();
        let analysis = analyzer().analyze("Bulk edit", &revisions);
        assert_eq!(analysis.lines_changed, 605);
        assert_eq!(analysis.risk_level, RiskLevel::High);
        assert!(analysis
            .files
            .iter()
            .all(|f| f.analysis.risk_level == RiskLevel::Low));
    }

    #[test]
    fn test_single_risky_file_keeps_commit_low() {
        let revisions = vec![revision("src/a.rs", Some("fn a() {}\n"), Some("fn a() {}\nfn b() {}\n"), 1)];
        let analysis = analyzer().analyze("Add b", &revisions);
        // One risky file does not escalate the commit.
        assert_eq!(analysis.files[0].analysis.risk_level, RiskLevel::High);
        assert_eq!(analysis.risk_level, RiskLevel::Low);
        assert_eq!(analysis.metrics.files, 1);
    }

    #[test]
    fn test_deleted_file_uses_before_metrics() {
        let revisions = vec![revision("lib/old.js", Some("function gone() {}\n"), None, 0)];
        let analysis = analyzer().analyze("Remove old", &revisions);
        let file = &analysis.files[0];
        assert_eq!(file.analysis.risk_level, RiskLevel::High);
        assert_eq!(file.metrics.as_ref().map(|m| m.functions), Some(1));
        assert_eq!(analysis.metrics.files, 0);
        assert_eq!(analysis.impact.breaking_changes.len(), 1);
    }

    struct Broken;

    impl ParsingStrategy for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn supports(&self, _language: Language) -> bool {
            true
        }

        fn parse(&self, _content: &str, _language: Language) -> Result<ParsedCode, ParseError> {
            Err(ParseError::TreeUnavailable("no grammar".to_string()))
        }
    }

    #[test]
    fn test_structural_failure_is_recorded() {
        let analyzer = CommitAnalyzer::new(
            Arc::new(CodeParser::with_strategy(Box::new(Broken))),
            Arc::new(ParsedCodeCache::default()),
            RiskThresholds::default(),
        );
        let revisions = vec![revision("src/a.py", None, Some("def a():\n    return 1\n"), 2)];
        let analysis = analyzer.analyze("Add a", &revisions);
        assert_eq!(analysis.degraded_files, vec!["src/a.py".to_string()]);
        assert_eq!(analysis.files[0].parser, Some(StrategyUsed::Fallback));
        assert!(analysis.files[0].analysis.added_functions.len() == 1);
    }
}
