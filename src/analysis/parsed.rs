//! Structural snapshot of a single source file.
//!
//! A [`ParsedCode`] is produced fresh by every parse call and never mutated
//! afterwards; the diff analyzer compares two snapshots by value.

use serde::{Deserialize, Serialize};

use super::language::Language;

/// A function or method extracted from a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// 1-based first line.
    pub start_line: usize,
    /// 1-based last line (inclusive).
    pub end_line: usize,
    pub parameters: Vec<String>,
    /// Cyclomatic estimate for the function body (base 1).
    pub complexity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl FunctionInfo {
    /// Number of lines the function spans.
    pub fn line_span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// A class-like declaration (class, struct, enum, trait, interface).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub methods: Vec<String>,
    pub properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superclass: Option<String>,
}

impl ClassInfo {
    pub fn line_span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// An import/use statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInfo {
    /// Module path or package the import refers to.
    pub source: String,
    /// Names brought into scope, when they can be determined.
    pub specifiers: Vec<String>,
    pub line: usize,
}

/// A publicly exported symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportInfo {
    pub name: String,
    pub line: usize,
}

/// A comment block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentInfo {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl CommentInfo {
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// Structural summary of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCode {
    pub language: Language,
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<ImportInfo>,
    pub exports: Vec<ExportInfo>,
    pub comments: Vec<CommentInfo>,
    /// Whole-file cyclomatic estimate (base 1).
    pub complexity: u32,
    pub lines_of_code: usize,
}

impl ParsedCode {
    /// An empty snapshot with complexity 1, used when extraction fails.
    pub fn minimal(language: Language, content: &str) -> Self {
        Self {
            language,
            functions: Vec::new(),
            classes: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            comments: Vec::new(),
            complexity: 1,
            lines_of_code: count_lines(content),
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Total number of lines covered by comments.
    pub fn comment_lines(&self) -> usize {
        self.comments.iter().map(CommentInfo::line_count).sum()
    }

    /// Ratio of comment lines to lines of code, 0 for empty files.
    pub fn comment_ratio(&self) -> f64 {
        if self.lines_of_code == 0 {
            return 0.0;
        }
        self.comment_lines() as f64 / self.lines_of_code as f64
    }

    /// Mean function complexity, 0 when the file has no functions.
    pub fn average_function_complexity(&self) -> f64 {
        if self.functions.is_empty() {
            return 0.0;
        }
        let total: u32 = self.functions.iter().map(|f| f.complexity).sum();
        total as f64 / self.functions.len() as f64
    }

    /// Mean function length in lines, 0 when the file has no functions.
    pub fn average_function_length(&self) -> f64 {
        if self.functions.is_empty() {
            return 0.0;
        }
        let total: usize = self.functions.iter().map(FunctionInfo::line_span).sum();
        total as f64 / self.functions.len() as f64
    }
}

/// Counts non-blank lines.
pub fn count_lines(content: &str) -> usize {
    content.lines().filter(|l| !l.trim().is_empty()).count()
}
