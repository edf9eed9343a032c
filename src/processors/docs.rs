//! `generate_docs` handler.
//!
//! Parses every supported file at a revision into an outline and adds an
//! overview, written by the model when one is configured.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::commit::short_sha;
use super::{scaled_percent, ProcessorContext};
use crate::analysis::impact::top_level_module;
use crate::analysis::{Language, ParsedCode, StrategyUsed};
use crate::error::JobError;
use crate::metrics::FallbackKind;
use crate::scheduler::{GenerateDocsPayload, Job, JobHandler, ProgressReporter};
use crate::storage::{AnalysisKind, AnalysisRecord};
use crate::utils::json_extraction::parse_json_reply;

/// Files documented per revision; the rest are counted as skipped.
const MAX_DOC_FILES: usize = 300;

/// Outline entries listed per file in the overview prompt.
const MAX_PROMPT_SYMBOLS: usize = 8;

const DOCS_SYSTEM_PROMPT: &str = r#"You are writing the developer overview of a code repository.

You receive an outline of its source files: language, functions with their
parameters and docstrings, classes with their methods.

Respond with ONLY a JSON object in this exact format:
{
  "overview": "<one or two paragraphs on what the code base does and how it is organized>",
  "modules": {"<top-level directory>": "<one sentence on its role>", ...}
}

Do not include any text outside the JSON object."#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionOutline {
    pub name: String,
    pub line: usize,
    pub parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassOutline {
    pub name: String,
    pub line: usize,
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superclass: Option<String>,
}

/// Documentation outline of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutline {
    pub path: String,
    pub language: Language,
    pub lines_of_code: usize,
    pub functions: Vec<FunctionOutline>,
    pub classes: Vec<ClassOutline>,
    pub exports: Vec<String>,
    pub quality_score: u8,
}

impl FileOutline {
    fn new(path: &str, parsed: &ParsedCode, quality_score: u8) -> Self {
        Self {
            path: path.to_string(),
            language: parsed.language,
            lines_of_code: parsed.lines_of_code,
            functions: parsed
                .functions
                .iter()
                .map(|f| FunctionOutline {
                    name: f.name.clone(),
                    line: f.start_line,
                    parameters: f.parameters.clone(),
                    docstring: f.docstring.clone(),
                    return_type: f.return_type.clone(),
                })
                .collect(),
            classes: parsed
                .classes
                .iter()
                .map(|c| ClassOutline {
                    name: c.name.clone(),
                    line: c.start_line,
                    methods: c.methods.clone(),
                    superclass: c.superclass.clone(),
                })
                .collect(),
            exports: parsed.exports.iter().map(|e| e.name.clone()).collect(),
            quality_score,
        }
    }
}

/// Stored documentation of one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationReport {
    pub revision: String,
    pub overview: String,
    /// Role of each top-level module.
    pub modules: BTreeMap<String, String>,
    pub files: Vec<FileOutline>,
    /// Supported files left out past the per-revision limit.
    pub skipped_files: usize,
    /// Files parsed by the pattern parser after the structural parser failed.
    pub degraded_files: Vec<String>,
    /// True when the overview was built without the model.
    pub heuristic_overview: bool,
}

#[derive(Debug, Deserialize)]
struct OverviewReply {
    overview: String,
    #[serde(default)]
    modules: BTreeMap<String, String>,
}

/// Documents a repository revision.
pub struct DocsProcessor {
    context: Arc<ProcessorContext>,
}

impl DocsProcessor {
    pub fn new(context: Arc<ProcessorContext>) -> Self {
        Self { context }
    }

    async fn overview(&self, files: &[FileOutline]) -> (String, BTreeMap<String, String>, bool) {
        if !self.context.reviewer.has_model() {
            return heuristic_overview(files);
        }

        let prompt = build_outline_prompt(files);
        match self.context.reviewer.complete(DOCS_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => match parse_json_reply::<OverviewReply>(&reply) {
                Ok(parsed) => (parsed.overview, parsed.modules, false),
                Err(e) => {
                    warn!(error = %e, "Overview reply unusable, using heuristic overview");
                    self.context.metrics.record_fallback(FallbackKind::Review, 1);
                    heuristic_overview(files)
                }
            },
            Err(e) => {
                warn!(error = %e, "Overview request failed, using heuristic overview");
                self.context.metrics.record_fallback(FallbackKind::Review, 1);
                heuristic_overview(files)
            }
        }
    }
}

/// Overview assembled from the outlines alone.
pub(crate) fn heuristic_overview(files: &[FileOutline]) -> (String, BTreeMap<String, String>, bool) {
    let mut languages: BTreeMap<&str, usize> = BTreeMap::new();
    let mut modules: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();
    for file in files {
        *languages.entry(file.language.as_str()).or_insert(0) += 1;
        let entry = modules.entry(top_level_module(&file.path)).or_insert((0, 0, 0));
        entry.0 += 1;
        entry.1 += file.functions.len();
        entry.2 += file.classes.len();
    }

    let language_list = languages
        .iter()
        .map(|(lang, count)| format!("{lang} ({count})"))
        .collect::<Vec<_>>()
        .join(", ");
    let lines: usize = files.iter().map(|f| f.lines_of_code).sum();
    let overview = if files.is_empty() {
        "No source files in a supported language were found.".to_string()
    } else {
        format!(
            "{} source files, {} lines of code, in {} top-level modules. Languages: {}.",
            files.len(),
            lines,
            modules.len(),
            language_list
        )
    };

    let modules = modules
        .into_iter()
        .map(|(name, (files, functions, classes))| {
            (
                name,
                format!("{files} files, {functions} functions, {classes} classes"),
            )
        })
        .collect();

    (overview, modules, true)
}

fn build_outline_prompt(files: &[FileOutline]) -> String {
    let mut prompt = String::from("Source outline:\n");
    for file in files {
        prompt.push_str(&format!("\n{} ({}, {} lines)\n", file.path, file.language, file.lines_of_code));
        for class in file.classes.iter().take(MAX_PROMPT_SYMBOLS) {
            prompt.push_str(&format!("  class {}: {}\n", class.name, class.methods.join(", ")));
        }
        for function in file.functions.iter().take(MAX_PROMPT_SYMBOLS) {
            prompt.push_str(&format!("  fn {}({})", function.name, function.parameters.join(", ")));
            if let Some(doc) = function.docstring.as_deref().and_then(|d| d.lines().next()) {
                prompt.push_str(&format!(" - {}", doc.trim()));
            }
            prompt.push('\n');
        }
    }
    prompt
}

#[async_trait]
impl JobHandler for DocsProcessor {
    async fn handle(&self, job: &Job, progress: ProgressReporter) -> Result<serde_json::Value, JobError> {
        let payload: GenerateDocsPayload = job.payload_as().map_err(JobError::Permanent)?;
        let started = Instant::now();

        progress.report(5, "Checking out repository");
        let checkout = self.context.source.checkout(&payload.repository).await?;
        let requested = payload.revision.as_deref().unwrap_or("HEAD");
        let revision = checkout.commit(requested).await?.sha;

        let mut paths: Vec<String> = checkout
            .list_files(&revision)
            .await?
            .into_iter()
            .filter(|p| Language::from_path(p).is_some())
            .collect();
        let skipped_files = paths.len().saturating_sub(MAX_DOC_FILES);
        paths.truncate(MAX_DOC_FILES);
        progress.report(10, format!("Documenting {} files", paths.len()));

        let mut files = Vec::with_capacity(paths.len());
        let mut degraded_files = Vec::new();
        for (idx, path) in paths.iter().enumerate() {
            if let Some(content) = checkout.file_at(&revision, path).await? {
                if let Some((parsed, strategy)) = self.context.analyzer.parse_file(&content, path) {
                    if strategy == StrategyUsed::Fallback {
                        degraded_files.push(path.clone());
                    }
                    let quality = self.context.analyzer.metrics().quality_score(&parsed);
                    files.push(FileOutline::new(path, &parsed, quality));
                }
            }
            progress.report(scaled_percent(idx + 1, paths.len(), 10, 80), format!("Parsed {path}"));
        }
        if !degraded_files.is_empty() {
            warn!(job_id = %job.id, files = degraded_files.len(), "Structural parse unavailable for some files, used pattern fallback");
        }
        self.context
            .metrics
            .record_fallback(FallbackKind::Parse, degraded_files.len());

        progress.report(85, "Writing overview");
        let (overview, modules, heuristic) = self.overview(&files).await;

        let report = DocumentationReport {
            revision: revision.clone(),
            overview,
            modules,
            files,
            skipped_files,
            degraded_files,
            heuristic_overview: heuristic,
        };
        let analysis_id = self
            .context
            .results
            .save(&AnalysisRecord::new(
                job.id,
                AnalysisKind::Documentation,
                &payload.repository.url,
                &revision,
                serde_json::to_value(&report)?,
            ))
            .await?;
        progress.report(100, "Stored documentation");

        info!(
            job_id = %job.id,
            revision = %short_sha(&revision),
            files = report.files.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Documentation stored"
        );

        Ok(json!({
            "analysis_id": analysis_id,
            "revision": revision,
            "files": report.files.len(),
            "skipped_files": skipped_files,
            "heuristic_overview": heuristic,
        }))
    }
}
