//! Diff and code analysis engine.
//!
//! Everything here is synchronous and CPU-bound; workers call it between the
//! I/O-bound steps of a job.
//!
//! - [`DiffParser`]: unified diff text to [`DiffFile`] records
//! - [`CodeParser`]: per-file structural snapshot ([`ParsedCode`])
//! - [`MetricsCalculator`]: maintainability index, technical debt, quality score
//! - [`DiffAnalyzer`]: before/after comparison and per-file risk
//! - [`ImpactAssessor`]: breaking changes, test/performance/security impact
//! - [`CommitAnalyzer`]: all of the above over one commit

pub mod cache;
pub mod code_parser;
pub mod commit;
pub mod diff_analyzer;
pub mod diff_parser;
pub mod impact;
pub mod language;
pub mod metrics;
pub mod parsed;

pub use cache::{CacheConfig, CacheStats, ContentHash, ParsedCodeCache};
pub use code_parser::{CodeParser, ParseError, ParsingStrategy, PatternParser, StrategyUsed};
#[cfg(feature = "structural")]
pub use code_parser::StructuralParser;
pub use commit::{ChangedFileAnalysis, CommitAnalysis, CommitAnalyzer, FileRevision};
pub use diff_analyzer::{
    ClassModification, DiffAnalysis, DiffAnalyzer, FileChangeKind, FunctionModification,
    RiskLevel, RiskThresholds,
};
pub use diff_parser::{DiffChunk, DiffFile, DiffLine, DiffLineKind, DiffParser};
pub use impact::{
    BreakingChange, BreakingChangeKind, ImpactAssessment, ImpactAssessor, PerformanceImpact,
    SecurityImpact, TestImpact,
};
pub use language::Language;
pub use metrics::{AggregateMetrics, FileMetrics, MetricsCalculator};
pub use parsed::{ClassInfo, CommentInfo, ExportInfo, FunctionInfo, ImportInfo, ParsedCode};
