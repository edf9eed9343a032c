//! Code parsing facade.
//!
//! [`CodeParser`] extracts a [`ParsedCode`] snapshot from one source file. Two
//! interchangeable strategies sit behind it:
//!
//! - [`StructuralParser`] builds a tree-sitter syntax tree and classifies nodes
//!   through a per-language node-type table (requires the `structural` feature).
//! - [`PatternParser`] approximates the same extraction with per-language
//!   regular expressions and never fails.
//!
//! The strategy set is fixed when the parser is constructed. A single parse call
//! is answered by exactly one strategy: the structural one when it supports the
//! language and succeeds, otherwise the pattern one.

mod pattern;
#[cfg(feature = "structural")]
mod structural;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::language::Language;
use super::parsed::ParsedCode;

pub use pattern::PatternParser;
#[cfg(feature = "structural")]
pub use structural::StructuralParser;

/// Errors a parsing strategy may report.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The strategy has no support for the language.
    #[error("Language {0} is not supported by this strategy")]
    UnsupportedLanguage(Language),

    /// The syntax tree could not be built.
    #[error("Failed to build syntax tree: {0}")]
    TreeUnavailable(String),

    /// Extraction failed part way.
    #[error("Extraction failed: {0}")]
    Extraction(String),
}

/// A way of turning file content into a [`ParsedCode`] snapshot.
pub trait ParsingStrategy: Send + Sync {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Whether this strategy can handle the language at all.
    fn supports(&self, language: Language) -> bool;

    /// Parses `content` as `language`.
    fn parse(&self, content: &str, language: Language) -> Result<ParsedCode, ParseError>;
}

/// Which strategy produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyUsed {
    Structural,
    Pattern,
    /// Pattern parse after the structural strategy failed.
    Fallback,
}

/// Counters for how parse calls were answered.
#[derive(Debug, Default)]
struct ParserStats {
    structural: AtomicU64,
    pattern: AtomicU64,
    fallbacks: AtomicU64,
}

/// Snapshot of [`CodeParser`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStatsSnapshot {
    pub structural: u64,
    pub pattern: u64,
    /// Calls where the structural strategy was tried and failed.
    pub fallbacks: u64,
}

/// Facade over the structural and pattern strategies.
pub struct CodeParser {
    structural: Option<Box<dyn ParsingStrategy>>,
    pattern: PatternParser,
    stats: ParserStats,
}

impl CodeParser {
    /// Creates a parser with the structural strategy when it is compiled in.
    pub fn new() -> Self {
        #[cfg(feature = "structural")]
        let structural: Option<Box<dyn ParsingStrategy>> = Some(Box::new(StructuralParser::new()));
        #[cfg(not(feature = "structural"))]
        let structural: Option<Box<dyn ParsingStrategy>> = None;

        Self {
            structural,
            pattern: PatternParser::new(),
            stats: ParserStats::default(),
        }
    }

    /// Creates a parser that only uses regular expressions.
    pub fn pattern_only() -> Self {
        Self {
            structural: None,
            pattern: PatternParser::new(),
            stats: ParserStats::default(),
        }
    }

    /// Creates a parser with a custom primary strategy.
    pub fn with_strategy(strategy: Box<dyn ParsingStrategy>) -> Self {
        Self {
            structural: Some(strategy),
            pattern: PatternParser::new(),
            stats: ParserStats::default(),
        }
    }

    /// Whether a structural strategy is available.
    pub fn has_structural(&self) -> bool {
        self.structural.is_some()
    }

    /// Parses a file. Returns `None` when the extension maps to no language.
    pub fn parse(&self, content: &str, file_path: impl AsRef<Path>) -> Option<ParsedCode> {
        self.parse_with_strategy(content, file_path)
            .map(|(parsed, _)| parsed)
    }

    /// Like [`CodeParser::parse`], also reporting which strategy answered.
    pub fn parse_with_strategy(
        &self,
        content: &str,
        file_path: impl AsRef<Path>,
    ) -> Option<(ParsedCode, StrategyUsed)> {
        let file_path = file_path.as_ref();
        let language = Language::from_path(file_path)?;

        let mut used = StrategyUsed::Pattern;
        if let Some(structural) = self.structural.as_ref().filter(|s| s.supports(language)) {
            match structural.parse(content, language) {
                Ok(parsed) => {
                    self.stats.structural.fetch_add(1, Ordering::Relaxed);
                    return Some((parsed, StrategyUsed::Structural));
                }
                Err(e) => {
                    used = StrategyUsed::Fallback;
                    self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        file = %file_path.display(),
                        strategy = structural.name(),
                        error = %e,
                        "Structural parse failed, using pattern parser"
                    );
                }
            }
        }

        debug!(file = %file_path.display(), language = %language, "Pattern parse");
        self.stats.pattern.fetch_add(1, Ordering::Relaxed);
        Some((self.pattern.parse_or_minimal(content, language), used))
    }

    pub fn stats(&self) -> ParserStatsSnapshot {
        ParserStatsSnapshot {
            structural: self.stats.structural.load(Ordering::Relaxed),
            pattern: self.stats.pattern.load(Ordering::Relaxed),
            fallbacks: self.stats.fallbacks.load(Ordering::Relaxed),
        }
    }
}

impl Default for CodeParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts branching constructs in already comment-stripped source lines.
pub(crate) fn is_branch_keyword(language: Language, word: &str) -> bool {
    match language {
        Language::Python => matches!(word, "if" | "elif" | "while" | "for" | "except" | "case"),
        Language::Rust => matches!(word, "if" | "while" | "for" | "loop" | "match"),
        Language::Go => matches!(word, "if" | "for" | "switch" | "case" | "select"),
        Language::JavaScript | Language::TypeScript | Language::Java => {
            matches!(word, "if" | "while" | "for" | "switch" | "case" | "catch")
        }
    }
}
