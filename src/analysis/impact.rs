//! Commit impact assessment.
//!
//! Derives breaking-change, test, performance and security signals from the
//! per-file diff analyses of one commit and its message.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::commit::ChangedFileAnalysis;
use super::diff_analyzer::RiskLevel;
use super::language::Language;
use crate::source::FileStatus;

/// Keywords that mark security-sensitive code.
pub const SECURITY_KEYWORDS: [&str; 6] = ["password", "secret", "token", "key", "auth", "crypto"];

/// Module name used for files at the repository root.
pub const ROOT_MODULE: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakingChangeKind {
    RemovedFunction,
    RemovedClass,
    SignatureChanged,
}

/// A removal or incompatible change to a public declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingChange {
    #[serde(rename = "type")]
    pub kind: BreakingChangeKind,
    pub description: String,
    /// `path:line` of the declaration in the revision that had it.
    pub location: String,
    pub severity: RiskLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestImpact {
    /// Changed files that are tests.
    pub affected_tests: Vec<String>,
    /// Changed source files that may need new tests.
    pub tests_needed: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceImpact {
    Positive,
    Negative,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityImpact {
    /// One entry per sensitive keyword hit, naming where it was found.
    pub vulnerabilities: Vec<String>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub affected_modules: BTreeSet<String>,
    pub breaking_changes: Vec<BreakingChange>,
    pub test_impact: TestImpact,
    pub performance_impact: PerformanceImpact,
    pub security_impact: SecurityImpact,
}

/// Turns diff analyses into an [`ImpactAssessment`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImpactAssessor;

impl ImpactAssessor {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, commit_message: &str, files: &[ChangedFileAnalysis]) -> ImpactAssessment {
        let complexity_change: i64 = files.iter().map(|f| f.analysis.complexity_change).sum();

        ImpactAssessment {
            affected_modules: files.iter().map(|f| top_level_module(&f.path)).collect(),
            breaking_changes: files.iter().flat_map(breaking_changes).collect(),
            test_impact: test_impact(files),
            performance_impact: performance_impact(complexity_change),
            security_impact: security_impact(commit_message, files),
        }
    }
}

/// First path segment, or [`ROOT_MODULE`] for files at the root.
pub fn top_level_module(path: &str) -> String {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((first, _)) if !first.is_empty() => first.to_string(),
        _ => ROOT_MODULE.to_string(),
    }
}

/// Whether a path looks like a test file.
pub fn is_test_path(path: &str) -> bool {
    let lowered = path.to_lowercase();
    let file_name = lowered.rsplit('/').next().unwrap_or(&lowered);
    let stem = file_name.split('.').next().unwrap_or(file_name);

    lowered.contains("/test")
        || lowered.starts_with("test")
        || lowered.contains("/tests/")
        || lowered.contains("/spec/")
        || lowered.contains("/__tests__/")
        || stem.ends_with("_test")
        || stem.starts_with("test_")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
}

fn is_private(language: Option<Language>, name: &str) -> bool {
    match language {
        Some(language) => language.is_private_name(name),
        None => name.starts_with('_'),
    }
}

fn breaking_changes(file: &ChangedFileAnalysis) -> Vec<BreakingChange> {
    let analysis = &file.analysis;
    let old_path = file.old_path.as_deref().unwrap_or(&file.path);
    let mut changes = Vec::new();

    for function in analysis
        .removed_functions
        .iter()
        .filter(|f| !is_private(file.language, &f.name))
    {
        changes.push(BreakingChange {
            kind: BreakingChangeKind::RemovedFunction,
            description: format!("Removed public function '{}'", function.name),
            location: format!("{old_path}:{}", function.start_line),
            severity: RiskLevel::High,
        });
    }

    for class in &analysis.removed_classes {
        changes.push(BreakingChange {
            kind: BreakingChangeKind::RemovedClass,
            description: format!("Removed class '{}'", class.name),
            location: format!("{old_path}:{}", class.start_line),
            severity: RiskLevel::High,
        });
    }

    for modified in analysis
        .modified_functions
        .iter()
        .filter(|m| m.parameters_before != m.parameters_after)
        .filter(|m| !is_private(file.language, &m.name))
    {
        changes.push(BreakingChange {
            kind: BreakingChangeKind::SignatureChanged,
            description: format!(
                "Parameter count of '{}' changed from {} to {}",
                modified.name, modified.parameters_before, modified.parameters_after
            ),
            location: file.path.clone(),
            severity: RiskLevel::Medium,
        });
    }

    changes
}

fn test_impact(files: &[ChangedFileAnalysis]) -> TestImpact {
    let mut impact = TestImpact::default();
    for file in files {
        if is_test_path(&file.path) {
            impact.affected_tests.push(file.path.clone());
        } else if file.language.is_some() && file.status != FileStatus::Deleted {
            impact.tests_needed.push(file.path.clone());
        }
    }
    impact
}

fn performance_impact(complexity_change: i64) -> PerformanceImpact {
    if complexity_change > 10 {
        PerformanceImpact::Negative
    } else if complexity_change < -5 {
        PerformanceImpact::Positive
    } else {
        PerformanceImpact::Neutral
    }
}

fn security_impact(commit_message: &str, files: &[ChangedFileAnalysis]) -> SecurityImpact {
    let mut hits = Vec::new();
    let mut scan = |text: &str, location: &str| {
        let lowered = text.to_lowercase();
        for keyword in SECURITY_KEYWORDS.iter().filter(|k| lowered.contains(*k)) {
            hits.push(format!("'{keyword}' in {location}"));
        }
    };

    scan(commit_message, "commit message");
    for file in files {
        scan(&file.path, &format!("path {}", file.path));
        let analysis = &file.analysis;
        let touched = analysis
            .added_functions
            .iter()
            .map(|f| f.name.as_str())
            .chain(analysis.modified_functions.iter().map(|m| m.name.as_str()));
        for name in touched {
            scan(name, &format!("function {name} ({})", file.path));
        }
    }

    SecurityImpact {
        risk_level: if hits.is_empty() {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        },
        vulnerabilities: hits,
    }
}
