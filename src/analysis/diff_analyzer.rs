//! Before/after comparison of parsed snapshots and risk classification.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::parsed::{ClassInfo, FunctionInfo, ParsedCode};

/// Coarse classification of how disruptive a change is likely to be.
///
/// Ordered so that `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heuristic boundaries for risk classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub high_complexity: i64,
    pub medium_complexity: i64,
    pub high_ratio: f64,
    pub medium_ratio: f64,
    pub high_files: usize,
    pub medium_files: usize,
    pub high_lines: usize,
    pub medium_lines: usize,
    /// Number of risky files that escalates a whole commit.
    pub risky_file_count: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high_complexity: 20,
            medium_complexity: 10,
            high_ratio: 0.5,
            medium_ratio: 0.25,
            high_files: 10,
            medium_files: 5,
            high_lines: 500,
            medium_lines: 200,
            risky_file_count: 3,
        }
    }
}

impl RiskThresholds {
    /// Per-file risk from complexity change and change ratio.
    pub fn file_risk(&self, complexity_change: i64, change_ratio: f64) -> RiskLevel {
        if complexity_change > self.high_complexity || change_ratio > self.high_ratio {
            RiskLevel::High
        } else if complexity_change > self.medium_complexity || change_ratio > self.medium_ratio {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Risk for a file with no previous version.
    pub fn added_file_risk(&self, complexity_change: i64) -> RiskLevel {
        if complexity_change > self.high_complexity {
            RiskLevel::High
        } else {
            RiskLevel::Low
        }
    }

    /// Commit-level risk from size and the per-file risks.
    pub fn commit_risk(
        &self,
        files_changed: usize,
        lines_changed: usize,
        file_risks: &[RiskLevel],
    ) -> RiskLevel {
        let by_size = if files_changed > self.high_files || lines_changed > self.high_lines {
            RiskLevel::High
        } else if files_changed > self.medium_files || lines_changed > self.medium_lines {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let high = file_risks.iter().filter(|r| **r == RiskLevel::High).count();
        let risky = file_risks.iter().filter(|r| **r >= RiskLevel::Medium).count();
        let by_files = if high >= self.risky_file_count {
            RiskLevel::High
        } else if risky >= self.risky_file_count {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        by_size.max(by_files)
    }
}

/// How a file changed between the two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Added,
    Deleted,
    Modified,
    /// Neither revision could be parsed.
    Unparsed,
}

/// A function present in both snapshots whose shape changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionModification {
    pub name: String,
    pub complexity_before: u32,
    pub complexity_after: u32,
    pub parameters_before: usize,
    pub parameters_after: usize,
    pub lines_before: usize,
    pub lines_after: usize,
}

/// A class present in both snapshots whose shape changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassModification {
    pub name: String,
    pub added_methods: Vec<String>,
    pub removed_methods: Vec<String>,
    pub lines_before: usize,
    pub lines_after: usize,
}

/// Delta between two snapshots of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffAnalysis {
    pub change_kind: FileChangeKind,
    pub added_functions: Vec<FunctionInfo>,
    pub removed_functions: Vec<FunctionInfo>,
    pub modified_functions: Vec<FunctionModification>,
    pub added_classes: Vec<ClassInfo>,
    pub removed_classes: Vec<ClassInfo>,
    pub modified_classes: Vec<ClassModification>,
    pub complexity_change: i64,
    pub risk_level: RiskLevel,
}

impl DiffAnalysis {
    fn empty(change_kind: FileChangeKind) -> Self {
        Self {
            change_kind,
            added_functions: Vec::new(),
            removed_functions: Vec::new(),
            modified_functions: Vec::new(),
            added_classes: Vec::new(),
            removed_classes: Vec::new(),
            modified_classes: Vec::new(),
            complexity_change: 0,
            risk_level: RiskLevel::Low,
        }
    }

    /// Number of added, removed and modified functions and classes.
    pub fn total_changes(&self) -> usize {
        self.added_functions.len()
            + self.removed_functions.len()
            + self.modified_functions.len()
            + self.added_classes.len()
            + self.removed_classes.len()
            + self.modified_classes.len()
    }
}

/// Compares parsed snapshots and classifies risk.
#[derive(Debug, Clone, Default)]
pub struct DiffAnalyzer {
    thresholds: RiskThresholds,
}

impl DiffAnalyzer {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn analyze(&self, before: Option<&ParsedCode>, after: Option<&ParsedCode>) -> DiffAnalysis {
        match (before, after) {
            (None, None) => DiffAnalysis::empty(FileChangeKind::Unparsed),
            (None, Some(after)) => {
                let mut analysis = DiffAnalysis::empty(FileChangeKind::Added);
                analysis.added_functions = after.functions.clone();
                analysis.added_classes = after.classes.clone();
                analysis.complexity_change = i64::from(after.complexity);
                analysis.risk_level = self.thresholds.added_file_risk(analysis.complexity_change);
                analysis
            }
            (Some(before), None) => {
                let mut analysis = DiffAnalysis::empty(FileChangeKind::Deleted);
                analysis.removed_functions = before.functions.clone();
                analysis.removed_classes = before.classes.clone();
                analysis.complexity_change = -i64::from(before.complexity);
                analysis.risk_level = RiskLevel::High;
                analysis
            }
            (Some(before), Some(after)) => self.compare(before, after),
        }
    }

    fn compare(&self, before: &ParsedCode, after: &ParsedCode) -> DiffAnalysis {
        let mut analysis = DiffAnalysis::empty(FileChangeKind::Modified);

        let (added, removed, common) =
            match_by_name(&before.functions, &after.functions, |f| f.name.as_str());
        analysis.added_functions = added;
        analysis.removed_functions = removed;
        analysis.modified_functions = common
            .into_iter()
            .filter(|(old, new)| {
                old.complexity != new.complexity
                    || old.parameters.len() != new.parameters.len()
                    || old.line_span() != new.line_span()
            })
            .map(|(old, new)| FunctionModification {
                name: new.name.clone(),
                complexity_before: old.complexity,
                complexity_after: new.complexity,
                parameters_before: old.parameters.len(),
                parameters_after: new.parameters.len(),
                lines_before: old.line_span(),
                lines_after: new.line_span(),
            })
            .collect();

        let (added, removed, common) =
            match_by_name(&before.classes, &after.classes, |c| c.name.as_str());
        analysis.added_classes = added;
        analysis.removed_classes = removed;
        analysis.modified_classes = common
            .into_iter()
            .filter(|(old, new)| {
                old.methods.len() != new.methods.len() || old.line_span() != new.line_span()
            })
            .map(|(old, new)| {
                let old_methods: HashSet<&str> = old.methods.iter().map(String::as_str).collect();
                let new_methods: HashSet<&str> = new.methods.iter().map(String::as_str).collect();
                ClassModification {
                    name: new.name.clone(),
                    added_methods: new
                        .methods
                        .iter()
                        .filter(|m| !old_methods.contains(m.as_str()))
                        .cloned()
                        .collect(),
                    removed_methods: old
                        .methods
                        .iter()
                        .filter(|m| !new_methods.contains(m.as_str()))
                        .cloned()
                        .collect(),
                    lines_before: old.line_span(),
                    lines_after: new.line_span(),
                }
            })
            .collect();

        analysis.complexity_change = i64::from(after.complexity) - i64::from(before.complexity);

        let original_count = before.functions.len() + before.classes.len();
        let change_ratio = analysis.total_changes() as f64 / original_count.max(1) as f64;
        analysis.risk_level = self
            .thresholds
            .file_risk(analysis.complexity_change, change_ratio);
        analysis
    }
}

/// Splits two declaration lists into (added, removed, matched pairs) by name.
///
/// Order follows the `after` list for added and matched items and the
/// `before` list for removed ones. The first declaration wins for duplicate
/// names.
fn match_by_name<'a, T: Clone>(
    before: &'a [T],
    after: &'a [T],
    name: impl Fn(&T) -> &str,
) -> (Vec<T>, Vec<T>, Vec<(&'a T, &'a T)>) {
    let mut before_by_name: HashMap<&str, &T> = HashMap::new();
    for item in before {
        before_by_name.entry(name(item)).or_insert(item);
    }
    let after_names: HashSet<&str> = after.iter().map(&name).collect();

    let mut added = Vec::new();
    let mut common = Vec::new();
    let mut seen = HashSet::new();
    for item in after {
        let key = name(item);
        match before_by_name.get(key) {
            Some(old) if seen.insert(key) => common.push((*old, item)),
            Some(_) => {}
            None => added.push(item.clone()),
        }
    }

    let removed = before
        .iter()
        .filter(|item| !after_names.contains(name(*item)))
        .cloned()
        .collect();

    (added, removed, common)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::language::Language;
    use proptest::prelude::*;

    fn function(name: &str, start: usize, end: usize, complexity: u32) -> FunctionInfo {
        FunctionInfo {
            name: name.to_string(),
            start_line: start,
            end_line: end,
            parameters: vec!["a".to_string()],
            complexity,
            docstring: None,
            return_type: None,
        }
    }

    fn class(name: &str, methods: &[&str]) -> ClassInfo {
        ClassInfo {
            name: name.to_string(),
            start_line: 1,
            end_line: 10,
            methods: methods.iter().map(|m| m.to_string()).collect(),
            properties: Vec::new(),
            superclass: None,
        }
    }

    fn snapshot(functions: Vec<FunctionInfo>, classes: Vec<ClassInfo>, complexity: u32) -> ParsedCode {
        let mut parsed = ParsedCode::minimal(Language::TypeScript, "");
        parsed.functions = functions;
        parsed.classes = classes;
        parsed.complexity = complexity;
        parsed
    }

    #[test]
    fn test_added_file_with_moderate_complexity_is_low_risk() {
        let after = snapshot(
            (0..5).map(|i| function(&format!("f{i}"), i * 10 + 1, i * 10 + 5, 2)).collect(),
            Vec::new(),
            12,
        );
        let analysis = DiffAnalyzer::default().analyze(None, Some(&after));
        assert_eq!(analysis.change_kind, FileChangeKind::Added);
        assert_eq!(analysis.added_functions.len(), 5);
        assert_eq!(analysis.complexity_change, 12);
        assert_eq!(analysis.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_added_file_boundaries() {
        let analyzer = DiffAnalyzer::default();
        let at_limit = snapshot(Vec::new(), Vec::new(), 20);
        assert_eq!(analyzer.analyze(None, Some(&at_limit)).risk_level, RiskLevel::Low);
        let over = snapshot(Vec::new(), Vec::new(), 21);
        assert_eq!(analyzer.analyze(None, Some(&over)).risk_level, RiskLevel::High);
    }

    #[test]
    fn test_deleted_file_is_high_risk() {
        let before = snapshot(vec![function("gone", 1, 3, 1)], vec![class("Old", &[])], 2);
        let analysis = DiffAnalyzer::default().analyze(Some(&before), None);
        assert_eq!(analysis.change_kind, FileChangeKind::Deleted);
        assert_eq!(analysis.removed_functions.len(), 1);
        assert_eq!(analysis.removed_classes.len(), 1);
        assert_eq!(analysis.complexity_change, -2);
        assert_eq!(analysis.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_neither_revision_parsed() {
        let analysis = DiffAnalyzer::default().analyze(None, None);
        assert_eq!(analysis.change_kind, FileChangeKind::Unparsed);
        assert_eq!(analysis.total_changes(), 0);
        assert_eq!(analysis.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_modified_file_matches_by_name() {
        let before = snapshot(
            vec![
                function("keep", 1, 5, 2),
                function("grow", 6, 10, 2),
                function("drop", 11, 12, 1),
                function("a", 13, 14, 1),
                function("b", 15, 16, 1),
                function("c", 17, 18, 1),
                function("d", 19, 20, 1),
            ],
            vec![class("Service", &["run"])],
            10,
        );
        let after = snapshot(
            vec![
                function("keep", 1, 5, 2),
                function("grow", 6, 20, 5),
                function("fresh", 21, 22, 1),
                function("a", 23, 24, 1),
                function("b", 25, 26, 1),
                function("c", 27, 28, 1),
                function("d", 29, 30, 1),
            ],
            vec![class("Service", &["run", "stop"])],
            14,
        );

        let analysis = DiffAnalyzer::default().analyze(Some(&before), Some(&after));
        assert_eq!(analysis.change_kind, FileChangeKind::Modified);
        assert_eq!(analysis.added_functions[0].name, "fresh");
        assert_eq!(analysis.removed_functions[0].name, "drop");
        assert_eq!(analysis.modified_functions.len(), 1);
        assert_eq!(analysis.modified_functions[0].name, "grow");
        assert_eq!(analysis.modified_functions[0].lines_after, 15);
        assert_eq!(analysis.modified_classes[0].added_methods, vec!["stop".to_string()]);
        assert_eq!(analysis.complexity_change, 4);
        // 4 changes over 8 declarations
        assert_eq!(analysis.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_file_risk_boundaries() {
        let t = RiskThresholds::default();
        assert_eq!(t.file_risk(10, 0.25), RiskLevel::Low);
        assert_eq!(t.file_risk(11, 0.0), RiskLevel::Medium);
        assert_eq!(t.file_risk(0, 0.26), RiskLevel::Medium);
        assert_eq!(t.file_risk(20, 0.5), RiskLevel::Medium);
        assert_eq!(t.file_risk(21, 0.0), RiskLevel::High);
        assert_eq!(t.file_risk(-50, 0.51), RiskLevel::High);
    }

    #[test]
    fn test_commit_risk_by_size() {
        let t = RiskThresholds::default();
        assert_eq!(t.commit_risk(11, 600, &[]), RiskLevel::High);
        assert_eq!(t.commit_risk(2, 501, &[]), RiskLevel::High);
        assert_eq!(t.commit_risk(6, 10, &[]), RiskLevel::Medium);
        assert_eq!(t.commit_risk(5, 200, &[]), RiskLevel::Low);
    }

    #[test]
    fn test_commit_risk_escalates_on_risky_files() {
        let t = RiskThresholds::default();
        let medium = [RiskLevel::Medium, RiskLevel::High, RiskLevel::Medium];
        assert_eq!(t.commit_risk(3, 30, &medium), RiskLevel::Medium);
        let high = [RiskLevel::High; 3];
        assert_eq!(t.commit_risk(3, 30, &high), RiskLevel::High);
        let few = [RiskLevel::High, RiskLevel::High, RiskLevel::Low];
        assert_eq!(t.commit_risk(3, 30, &few), RiskLevel::Low);
    }

    #[test]
    fn test_risk_level_ordering_and_serde() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"high\"");
    }

    proptest! {
        #[test]
        fn prop_risk_monotonic_in_complexity(
            base in -100i64..100,
            delta in 0i64..100,
            ratio in 0.0f64..2.0,
        ) {
            let t = RiskThresholds::default();
            prop_assert!(t.file_risk(base, ratio) <= t.file_risk(base + delta, ratio));
            prop_assert!(t.added_file_risk(base) <= t.added_file_risk(base + delta));
        }

        #[test]
        fn prop_commit_risk_monotonic_in_size(
            files in 0usize..30,
            lines in 0usize..1000,
            extra_files in 0usize..10,
            extra_lines in 0usize..500,
        ) {
            let t = RiskThresholds::default();
            prop_assert!(
                t.commit_risk(files, lines, &[]) <= t.commit_risk(files + extra_files, lines + extra_lines, &[])
            );
        }
    }
}
