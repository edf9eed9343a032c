//! Code metrics: per-file quality score and the aggregate maintainability
//! index / technical-debt estimate over a set of parsed files.

use serde::{Deserialize, Serialize};

use super::language::Language;
use super::parsed::ParsedCode;

/// Aggregate metrics over several files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub files: usize,
    pub lines_of_code: usize,
    /// Sum of whole-file complexities.
    pub complexity: u32,
    pub average_complexity: f64,
    /// Clamped to [0, 100].
    pub maintainability_index: f64,
    /// Abstract hours.
    pub technical_debt: f64,
}

/// Metrics for a single file snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub language: Language,
    pub lines_of_code: usize,
    pub complexity: u32,
    pub functions: usize,
    pub classes: usize,
    pub average_function_complexity: f64,
    pub average_function_length: f64,
    pub comment_ratio: f64,
    pub quality_score: u8,
}

/// Stateless metrics calculator.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregates per-file metrics.
    ///
    /// The average complexity of an empty set is taken as 1 so the logarithm in
    /// the maintainability index stays finite.
    pub fn aggregate(&self, files: &[ParsedCode]) -> AggregateMetrics {
        let lines_of_code: usize = files.iter().map(|f| f.lines_of_code).sum();
        let complexity: u32 = files.iter().map(|f| f.complexity).sum();
        let average_complexity = if files.is_empty() {
            1.0
        } else {
            complexity as f64 / files.len() as f64
        };

        AggregateMetrics {
            files: files.len(),
            lines_of_code,
            complexity,
            average_complexity,
            maintainability_index: maintainability_index(average_complexity, lines_of_code),
            technical_debt: technical_debt(average_complexity, lines_of_code),
        }
    }

    pub fn file_metrics(&self, parsed: &ParsedCode) -> FileMetrics {
        FileMetrics {
            language: parsed.language,
            lines_of_code: parsed.lines_of_code,
            complexity: parsed.complexity,
            functions: parsed.functions.len(),
            classes: parsed.classes.len(),
            average_function_complexity: parsed.average_function_complexity(),
            average_function_length: parsed.average_function_length(),
            comment_ratio: parsed.comment_ratio(),
            quality_score: self.quality_score(parsed),
        }
    }

    /// Quality score in [0, 100], starting from 100.
    ///
    /// Function-based adjustments only apply when the file declares functions.
    pub fn quality_score(&self, parsed: &ParsedCode) -> u8 {
        let mut score: i32 = 100;

        if !parsed.functions.is_empty() {
            let avg_complexity = parsed.average_function_complexity();
            if avg_complexity > 10.0 {
                score -= 20;
            } else if avg_complexity > 5.0 {
                score -= 10;
            } else if avg_complexity <= 3.0 {
                score += 5;
            }

            let avg_length = parsed.average_function_length();
            if avg_length > 100.0 {
                score -= 15;
            } else if avg_length > 50.0 {
                score -= 5;
            } else if avg_length < 20.0 {
                score += 5;
            }
        }

        let comment_ratio = parsed.comment_ratio();
        if comment_ratio < 0.1 {
            score -= 15;
        } else if comment_ratio < 0.2 {
            score -= 5;
        } else if comment_ratio > 0.3 {
            score += 5;
        }

        score.clamp(0, 100) as u8
    }
}

/// `171 − 5.2·ln(avg) − 0.23·loc`, clamped to [0, 100].
pub fn maintainability_index(average_complexity: f64, lines_of_code: usize) -> f64 {
    let avg = average_complexity.max(1.0);
    (171.0 - 5.2 * avg.ln() - 0.23 * lines_of_code as f64).clamp(0.0, 100.0)
}

pub fn technical_debt(average_complexity: f64, lines_of_code: usize) -> f64 {
    (average_complexity - 10.0).max(0.0) * 0.5 + (lines_of_code as f64 - 1000.0).max(0.0) * 0.001
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::parsed::{CommentInfo, FunctionInfo};

    fn file(complexity: u32, loc: usize) -> ParsedCode {
        let mut parsed = ParsedCode::minimal(Language::Rust, "");
        parsed.complexity = complexity;
        parsed.lines_of_code = loc;
        parsed
    }

    fn function(span: usize, complexity: u32) -> FunctionInfo {
        FunctionInfo {
            name: format!("f{}", span),
            start_line: 1,
            end_line: span,
            parameters: Vec::new(),
            complexity,
            docstring: None,
            return_type: None,
        }
    }

    fn comments(lines: usize) -> Vec<CommentInfo> {
        vec![CommentInfo {
            text: "//".to_string(),
            start_line: 1,
            end_line: lines,
        }]
    }

    #[test]
    fn test_aggregate_small_codebase() {
        let metrics = MetricsCalculator::new().aggregate(&[file(4, 100), file(6, 200)]);
        assert_eq!(metrics.files, 2);
        assert_eq!(metrics.lines_of_code, 300);
        assert_eq!(metrics.complexity, 10);
        assert!((metrics.average_complexity - 5.0).abs() < 1e-9);
        let expected = 171.0 - 5.2 * 5.0f64.ln() - 0.23 * 300.0;
        assert!((metrics.maintainability_index - expected).abs() < 1e-9);
        assert_eq!(metrics.technical_debt, 0.0);
    }

    #[test]
    fn test_aggregate_large_codebase_clamps_and_accrues_debt() {
        let metrics = MetricsCalculator::new().aggregate(&[file(20, 2000)]);
        assert_eq!(metrics.maintainability_index, 0.0);
        assert!((metrics.technical_debt - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty() {
        let metrics = MetricsCalculator::new().aggregate(&[]);
        assert_eq!(metrics.files, 0);
        assert_eq!(metrics.maintainability_index, 100.0);
        assert_eq!(metrics.technical_debt, 0.0);
    }

    #[test]
    fn test_quality_score_penalties() {
        let mut parsed = file(30, 100);
        parsed.functions = vec![function(120, 12), function(120, 12)];
        // -20 complexity, -15 length, -15 comments
        assert_eq!(MetricsCalculator::new().quality_score(&parsed), 50);

        parsed.functions = vec![function(60, 7)];
        parsed.comments = comments(15);
        // -10 complexity, -5 length, -5 comments
        assert_eq!(MetricsCalculator::new().quality_score(&parsed), 80);
    }

    #[test]
    fn test_quality_score_bonuses_are_clamped() {
        let mut parsed = file(3, 100);
        parsed.functions = vec![function(10, 2)];
        parsed.comments = comments(40);
        assert_eq!(MetricsCalculator::new().quality_score(&parsed), 100);
    }

    #[test]
    fn test_quality_score_without_functions() {
        let mut parsed = file(1, 10);
        parsed.comments = comments(1);
        // ratio 0.1 is not below 0.1
        assert_eq!(MetricsCalculator::new().quality_score(&parsed), 95);
    }

    #[test]
    fn test_file_metrics() {
        let mut parsed = file(5, 40);
        parsed.functions = vec![function(10, 2), function(20, 4)];
        let metrics = MetricsCalculator::new().file_metrics(&parsed);
        assert_eq!(metrics.functions, 2);
        assert!((metrics.average_function_complexity - 3.0).abs() < 1e-9);
        assert!((metrics.average_function_length - 15.0).abs() < 1e-9);
    }
}
