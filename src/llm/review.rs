//! Natural-language review of an analyzed commit.
//!
//! The reviewer asks the model for `{summary, patterns, suggestions, concerns}`
//! and fills in `impact` and `complexity` from the static analysis when the
//! model leaves them out. When no model is configured, the call fails, or the
//! reply holds no usable JSON, the review is built from the analysis alone
//! and marked degraded. A review never fails the job.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::litellm::{GenerationRequest, LlmProvider, Message};
use super::rate_limit::RateLimiter;
use crate::analysis::{CommitAnalysis, FileChangeKind, RiskLevel, RiskThresholds};
use crate::error::LlmError;
use crate::metrics::{FallbackKind, MetricsCollector, TokenUsage};
use crate::utils::json_extraction::parse_json_reply;

/// Files listed individually in the prompt; the rest are summarized.
const MAX_PROMPT_FILES: usize = 40;

const REVIEW_SYSTEM_PROMPT: &str = r#"You are a senior engineer reviewing a single commit.

You receive the commit message and a static analysis of the change: files,
functions and classes added/removed/modified, complexity deltas, risk level,
breaking changes and security-sensitive names.

Respond with ONLY a JSON object in this exact format:
{
  "summary": "<two or three sentences on what the commit does>",
  "patterns": ["<design or coding pattern observed>", ...],
  "suggestions": ["<concrete improvement>", ...],
  "concerns": ["<risk a reviewer should check>", ...],
  "impact": "low|medium|high",
  "complexity": "simple|moderate|complex"
}

Do not include any text outside the JSON object."#;

const REVIEW_USER_TEMPLATE: &str = r#"Commit message:
{message}

Overall: {files} files, {lines} lines changed, complexity change {complexity}, risk {risk}.

Files:
{file_list}

Breaking changes:
{breaking}

Security-sensitive names:
{security}"#;

/// How hard a change is to understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeComplexity {
    Simple,
    Moderate,
    Complex,
}

impl ChangeComplexity {
    /// Heuristic from the magnitude of the complexity change.
    pub fn from_change(complexity_change: i64, thresholds: &RiskThresholds) -> Self {
        let magnitude = complexity_change.abs();
        if magnitude > thresholds.high_complexity {
            ChangeComplexity::Complex
        } else if magnitude > thresholds.medium_complexity {
            ChangeComplexity::Moderate
        } else {
            ChangeComplexity::Simple
        }
    }
}

/// Review attached to a commit analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub summary: String,
    pub patterns: Vec<String>,
    pub suggestions: Vec<String>,
    pub concerns: Vec<String>,
    pub impact: RiskLevel,
    pub complexity: ChangeComplexity,
    /// True when the feedback was built without the model.
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Shape of the model's reply; `impact`/`complexity` are optional.
#[derive(Debug, Deserialize)]
struct ReviewReply {
    summary: String,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    impact: Option<RiskLevel>,
    #[serde(default)]
    complexity: Option<ChangeComplexity>,
}

/// Tuning for model requests.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.2,
            max_tokens: 1200,
        }
    }
}

/// Produces [`ReviewFeedback`] for analyzed commits.
pub struct CommitReviewer {
    provider: Option<Arc<dyn LlmProvider>>,
    limiter: Option<Arc<RateLimiter>>,
    config: ReviewConfig,
    thresholds: RiskThresholds,
    metrics: MetricsCollector,
}

impl CommitReviewer {
    pub fn new(provider: Arc<dyn LlmProvider>, config: ReviewConfig) -> Self {
        Self {
            provider: Some(provider),
            limiter: None,
            config,
            thresholds: RiskThresholds::default(),
            metrics: MetricsCollector::new(),
        }
    }

    /// A reviewer that always answers from the static analysis.
    pub fn heuristic_only() -> Self {
        Self {
            provider: None,
            limiter: None,
            config: ReviewConfig::default(),
            thresholds: RiskThresholds::default(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_thresholds(mut self, thresholds: RiskThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn has_model(&self) -> bool {
        self.provider.is_some()
    }

    fn rate_key(&self) -> &str {
        if self.config.model.is_empty() {
            "default"
        } else {
            &self.config.model
        }
    }

    /// Sends one system+user exchange and returns the reply text.
    ///
    /// Applies the rate limiter and records request metrics.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let provider = self.provider.as_ref().ok_or(LlmError::MissingApiBase)?;
        if let Some(limiter) = &self.limiter {
            limiter.acquire(self.rate_key()).await;
        }

        let request = GenerationRequest::new(
            self.config.model.clone(),
            vec![Message::system(system), Message::user(prompt)],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
        .with_json_response();

        let started = Instant::now();
        let result = provider.generate(request).await;
        let latency = started.elapsed().as_secs_f64();

        match result {
            Ok(response) => {
                let usage = TokenUsage::new(
                    u64::from(response.usage.prompt_tokens),
                    u64::from(response.usage.completion_tokens),
                );
                self.metrics
                    .record_llm_request(&response.model, true, latency, usage);
                response
                    .first_content()
                    .map(str::to_string)
                    .ok_or_else(|| LlmError::ParseError("Empty LLM response".to_string()))
            }
            Err(e) => {
                self.metrics
                    .record_llm_request(self.rate_key(), false, latency, TokenUsage::default());
                Err(e)
            }
        }
    }

    /// Reviews one analyzed commit.
    pub async fn review(&self, message: &str, analysis: &CommitAnalysis) -> ReviewFeedback {
        if !self.has_model() {
            return self.heuristic(analysis, "no language model configured");
        }

        let prompt = build_review_prompt(message, analysis);
        let reply = match self.complete(REVIEW_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "LLM review failed, using heuristic review");
                return self.heuristic(analysis, &format!("language model request failed: {e}"));
            }
        };

        match parse_json_reply::<ReviewReply>(&reply) {
            Ok(parsed) => {
                debug!(patterns = parsed.patterns.len(), "LLM review parsed");
                let mut feedback = ReviewFeedback {
                    summary: parsed.summary,
                    patterns: parsed.patterns,
                    suggestions: parsed.suggestions,
                    concerns: parsed.concerns,
                    impact: parsed.impact.unwrap_or(analysis.risk_level),
                    complexity: parsed.complexity.unwrap_or_else(|| {
                        ChangeComplexity::from_change(analysis.complexity_change, &self.thresholds)
                    }),
                    degraded: false,
                    model: Some(self.rate_key().to_string()),
                };
                note_degraded_parsing(&mut feedback.concerns, analysis);
                feedback
            }
            Err(e) => {
                warn!(error = %e, "LLM review reply unusable, using heuristic review");
                self.heuristic(analysis, &format!("language model reply was not valid JSON: {e}"))
            }
        }
    }

    /// Review built from the static analysis alone.
    pub fn heuristic(&self, analysis: &CommitAnalysis, reason: &str) -> ReviewFeedback {
        self.metrics.record_fallback(FallbackKind::Review, 1);
        heuristic_review(analysis, &self.thresholds, reason)
    }
}

/// Deterministic review from the analysis.
pub fn heuristic_review(
    analysis: &CommitAnalysis,
    thresholds: &RiskThresholds,
    reason: &str,
) -> ReviewFeedback {
    let impact = &analysis.impact;
    let added = analysis
        .files
        .iter()
        .filter(|f| f.analysis.change_kind == FileChangeKind::Added)
        .count();
    let deleted = analysis
        .files
        .iter()
        .filter(|f| f.analysis.change_kind == FileChangeKind::Deleted)
        .count();

    let summary = format!(
        "Changes {} file(s) across {} module(s): {} lines changed, complexity change {:+}, {} risk.",
        analysis.files.len(),
        impact.affected_modules.len(),
        analysis.lines_changed,
        analysis.complexity_change,
        analysis.risk_level,
    );

    let mut patterns = Vec::new();
    if added > 0 {
        patterns.push(format!("Adds {added} new file(s)"));
    }
    if deleted > 0 {
        patterns.push(format!("Removes {deleted} file(s)"));
    }
    if !impact.test_impact.affected_tests.is_empty() {
        patterns.push("Updates tests alongside the change".to_string());
    }
    if analysis.complexity_change < 0 {
        patterns.push("Reduces overall complexity".to_string());
    }

    let mut suggestions = Vec::new();
    if impact.test_impact.affected_tests.is_empty() && !impact.test_impact.tests_needed.is_empty() {
        suggestions.push(format!(
            "Add tests covering: {}",
            impact.test_impact.tests_needed.join(", ")
        ));
    }
    if analysis.complexity_change > thresholds.medium_complexity {
        suggestions.push("Consider splitting the most complex new logic into smaller functions".to_string());
    }
    if !impact.breaking_changes.is_empty() {
        suggestions.push("Document the removed public API for downstream callers".to_string());
    }

    let mut concerns = vec![format!(
        "Automated review unavailable ({reason}); feedback derived from static analysis only"
    )];
    concerns.extend(impact.breaking_changes.iter().map(|b| b.description.clone()));
    if impact.security_impact.risk_level > RiskLevel::Low {
        concerns.push(format!(
            "Touches security-sensitive code: {}",
            impact.security_impact.vulnerabilities.join(", ")
        ));
    }
    note_degraded_parsing(&mut concerns, analysis);

    ReviewFeedback {
        summary,
        patterns,
        suggestions,
        concerns,
        impact: analysis.risk_level,
        complexity: ChangeComplexity::from_change(analysis.complexity_change, thresholds),
        degraded: true,
        model: None,
    }
}

fn note_degraded_parsing(concerns: &mut Vec<String>, analysis: &CommitAnalysis) {
    if !analysis.degraded_files.is_empty() {
        concerns.push(format!(
            "Structural parsing failed for {}; pattern-based results are approximate",
            analysis.degraded_files.join(", ")
        ));
    }
}

/// Prompt describing the commit and its static analysis.
pub fn build_review_prompt(message: &str, analysis: &CommitAnalysis) -> String {
    let mut file_list: Vec<String> = analysis
        .files
        .iter()
        .take(MAX_PROMPT_FILES)
        .map(|f| {
            let mut line = format!(
                "- {} ({:?}, +{}/-{}, risk {}, complexity {:+})",
                f.path,
                f.status,
                f.additions,
                f.deletions,
                f.analysis.risk_level,
                f.analysis.complexity_change
            );
            let a = &f.analysis;
            if !a.added_functions.is_empty() {
                line.push_str(&format!(
                    "\n  added: {}",
                    join_names(a.added_functions.iter().map(|x| x.name.as_str()))
                ));
            }
            if !a.removed_functions.is_empty() {
                line.push_str(&format!(
                    "\n  removed: {}",
                    join_names(a.removed_functions.iter().map(|x| x.name.as_str()))
                ));
            }
            if !a.modified_functions.is_empty() {
                line.push_str(&format!(
                    "\n  modified: {}",
                    join_names(a.modified_functions.iter().map(|x| x.name.as_str()))
                ));
            }
            line
        })
        .collect();
    if analysis.files.len() > MAX_PROMPT_FILES {
        file_list.push(format!(
            "- ... and {} more files",
            analysis.files.len() - MAX_PROMPT_FILES
        ));
    }

    let breaking: Vec<String> = analysis
        .impact
        .breaking_changes
        .iter()
        .map(|b| format!("- {} ({})", b.description, b.location))
        .collect();
    let security = &analysis.impact.security_impact.vulnerabilities;

    REVIEW_USER_TEMPLATE
        .replace("{message}", message.trim())
        .replace("{files}", &analysis.files.len().to_string())
        .replace("{lines}", &analysis.lines_changed.to_string())
        .replace("{complexity}", &format!("{:+}", analysis.complexity_change))
        .replace("{risk}", analysis.risk_level.as_str())
        .replace("{file_list}", &or_none(&file_list))
        .replace("{breaking}", &or_none(&breaking))
        .replace("{security}", &or_none(security))
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

fn or_none(lines: &[String]) -> String {
    if lines.is_empty() {
        "none".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CodeParser, CommitAnalyzer, ParsedCodeCache};
    use crate::llm::{Choice, GenerationResponse, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const DIFF: &str = "\
diff --git a/src/auth.py b/src/auth.py
--- a/src/auth.py
+++ b/src/auth.py
@@ -1,4 +1,6 @@
 def check_token(token):
-    return token == 'x'
+    if not token:
+        return False
+    return token == 'x'
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1 @@
-old
+new
";

    fn analysis() -> CommitAnalysis {
        let analyzer = CommitAnalyzer::new(
            Arc::new(CodeParser::pattern_only()),
            Arc::new(ParsedCodeCache::default()),
            RiskThresholds::default(),
        );
        analyzer.analyze_diff("Harden token check", DIFF)
    }

    struct ScriptedProvider {
        reply: Mutex<Result<String, LlmError>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Mutex::new(Ok(reply.to_string())),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: LlmError) -> Self {
            Self {
                reply: Mutex::new(Err(error)),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().expect("lock not poisoned").push(request);
            let reply = match &*self.reply.lock().expect("lock not poisoned") {
                Ok(content) => content.clone(),
                Err(e) => return Err(LlmError::RequestFailed(e.to_string())),
            };
            Ok(GenerationResponse {
                id: "mock-id".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(reply),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 120,
                    completion_tokens: 80,
                    total_tokens: 200,
                },
            })
        }
    }

    fn config() -> ReviewConfig {
        ReviewConfig {
            model: "review-model".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_change_complexity_thresholds() {
        let t = RiskThresholds::default();
        assert_eq!(ChangeComplexity::from_change(0, &t), ChangeComplexity::Simple);
        assert_eq!(ChangeComplexity::from_change(10, &t), ChangeComplexity::Simple);
        assert_eq!(ChangeComplexity::from_change(11, &t), ChangeComplexity::Moderate);
        assert_eq!(ChangeComplexity::from_change(-21, &t), ChangeComplexity::Complex);
    }

    #[test]
    fn test_prompt_mentions_files_and_security() {
        let prompt = build_review_prompt("Harden token check", &analysis());
        assert!(prompt.contains("Harden token check"));
        assert!(prompt.contains("src/auth.py"));
        assert!(prompt.contains("README.md"));
        assert!(prompt.contains("token"));
    }

    #[tokio::test]
    async fn test_llm_review_fills_missing_heuristics() {
        let provider = Arc::new(ScriptedProvider::replying(
            "Here you go:\n```json\n{\"summary\": \"Guards empty tokens.\", \"patterns\": [\"guard clause\"], \"concerns\": []}\n```",
        ));
        let reviewer = CommitReviewer::new(provider.clone(), config());
        let analysis = analysis();

        let feedback = reviewer.review("Harden token check", &analysis).await;
        assert!(!feedback.degraded);
        assert_eq!(feedback.summary, "Guards empty tokens.");
        assert_eq!(feedback.patterns, vec!["guard clause".to_string()]);
        assert_eq!(feedback.impact, analysis.risk_level);
        assert_eq!(feedback.complexity, ChangeComplexity::Simple);
        assert_eq!(feedback.model.as_deref(), Some("review-model"));

        let requests = provider.requests.lock().expect("lock not poisoned");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "review-model");
        assert!(requests[0].json_response);
    }

    #[tokio::test]
    async fn test_llm_review_keeps_model_impact() {
        let provider = Arc::new(ScriptedProvider::replying(
            r#"{"summary": "s", "impact": "high", "complexity": "complex"}"#,
        ));
        let feedback = CommitReviewer::new(provider, config())
            .review("m", &analysis())
            .await;
        assert_eq!(feedback.impact, RiskLevel::High);
        assert_eq!(feedback.complexity, ChangeComplexity::Complex);
    }

    #[tokio::test]
    async fn test_non_json_reply_degrades() {
        let provider = Arc::new(ScriptedProvider::replying("Looks good to me!"));
        let analysis = analysis();
        let feedback = CommitReviewer::new(provider, config())
            .review("m", &analysis)
            .await;

        assert!(feedback.degraded);
        assert_eq!(feedback.impact, analysis.risk_level);
        assert!(feedback.concerns[0].contains("not valid JSON"));
        assert!(feedback.model.is_none());
    }

    #[tokio::test]
    async fn test_failed_request_degrades() {
        let provider = Arc::new(ScriptedProvider::failing(LlmError::RequestFailed(
            "connection refused".to_string(),
        )));
        let feedback = CommitReviewer::new(provider, config())
            .review("m", &analysis())
            .await;
        assert!(feedback.degraded);
        assert!(feedback.concerns[0].contains("connection refused"));
    }

    #[tokio::test]
    async fn test_heuristic_only_reviewer() {
        let reviewer = CommitReviewer::heuristic_only();
        assert!(!reviewer.has_model());
        assert!(matches!(
            reviewer.complete("s", "p").await,
            Err(LlmError::MissingApiBase)
        ));

        let analysis = analysis();
        let feedback = reviewer.review("Harden token check", &analysis).await;
        assert!(feedback.degraded);
        assert!(feedback.summary.contains("2 file(s)"));
        assert!(feedback
            .concerns
            .iter()
            .any(|c| c.contains("security-sensitive")));
    }

    #[tokio::test]
    async fn test_rate_limiter_is_consulted() {
        let limiter = Arc::new(RateLimiter::per_minute(60).expect("limiter"));
        let provider = Arc::new(ScriptedProvider::replying(r#"{"summary": "s"}"#));
        let reviewer = CommitReviewer::new(provider, config()).with_rate_limiter(limiter.clone());

        reviewer.review("m", &analysis()).await;
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_heuristic_review_flags_breaking_changes() {
        let analyzer = CommitAnalyzer::new(
            Arc::new(CodeParser::pattern_only()),
            Arc::new(ParsedCodeCache::default()),
            RiskThresholds::default(),
        );
        let diff = "\
diff --git a/lib/api.py b/lib/api.py
deleted file mode 100644
--- a/lib/api.py
+++ /dev/null
@@ -1,2 +0,0 @@
-def fetch(url):
-    return url
";
        let analysis = analyzer.analyze_diff("Drop fetch", diff);
        let feedback = heuristic_review(&analysis, &RiskThresholds::default(), "offline");

        assert!(feedback.degraded);
        assert_eq!(feedback.impact, analysis.risk_level);
        assert!(feedback.patterns.iter().any(|p| p.contains("Removes 1 file")));
        assert!(feedback.suggestions.iter().any(|s| s.contains("removed public API")));
        assert!(feedback.concerns.len() >= 2);
    }
}
