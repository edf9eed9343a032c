//! Recording helpers over the raw Prometheus metrics.

use super::prometheus::{
    ACTIVE_WORKERS, FALLBACKS_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION, LLM_LATENCY,
    LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, QUALITY_SCORE, QUEUE_DEPTH,
};

/// Token usage of one LLM request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Kind of degraded result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// Pattern parsing after a structural parse failure.
    Parse,
    /// Heuristic review instead of an LLM review.
    Review,
}

impl FallbackKind {
    fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::Parse => "parse",
            FallbackKind::Review => "review",
        }
    }
}

/// Records commitlens operational metrics.
///
/// Every method is a no-op until [`super::init_metrics`] has run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Records a resolved job. `outcome` is `completed`, `retrying` or `failed`.
    pub fn record_job(&self, queue: &str, outcome: &str, duration_secs: f64) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[queue, outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[queue])
                .observe(duration_secs);
        }

        tracing::trace!(queue, outcome, duration_secs, "Recorded job metric");
    }

    pub fn record_llm_request(&self, model: &str, success: bool, latency_secs: f64, tokens: TokenUsage) {
        let status = if success { "success" } else { "failure" };

        if let Some(llm_requests) = LLM_REQUESTS_TOTAL.get() {
            llm_requests.with_label_values(&[model, status]).inc();
        }

        if let Some(llm_latency) = LLM_LATENCY.get() {
            llm_latency
                .with_label_values(&[model])
                .observe(latency_secs);
        }

        if let Some(llm_tokens) = LLM_TOKENS_TOTAL.get() {
            llm_tokens
                .with_label_values(&[model, "input"])
                .inc_by(tokens.input_tokens as f64);
            llm_tokens
                .with_label_values(&[model, "output"])
                .inc_by(tokens.output_tokens as f64);
        }

        tracing::trace!(
            model,
            status,
            latency_secs,
            input_tokens = tokens.input_tokens,
            output_tokens = tokens.output_tokens,
            "Recorded LLM request metric"
        );
    }

    pub fn record_fallback(&self, kind: FallbackKind, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(fallbacks) = FALLBACKS_TOTAL.get() {
            fallbacks
                .with_label_values(&[kind.as_str()])
                .inc_by(count as f64);
        }
    }

    pub fn record_quality(&self, score: u8) {
        if let Some(quality_score) = QUALITY_SCORE.get() {
            quality_score.observe(f64::from(score));
        }
    }

    /// Sets the number of jobs of one queue in one state.
    pub fn update_queue_depth(&self, queue: &str, state: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue, state])
                .set(depth as f64);
        }
    }

    pub fn update_workers(&self, queue: &str, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.with_label_values(&[queue]).set(count as f64);
        }

        tracing::trace!(queue, count, "Updated active workers metric");
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_token_usage() {
        let usage = TokenUsage::new(1000, 500);
        assert_eq!(usage.total(), 1500);
        assert_eq!(TokenUsage::default().total(), 0);
    }

    #[test]
    fn test_recording_before_and_after_init() {
        let collector = MetricsCollector::new();
        // No-ops are fine whether or not another test initialized metrics.
        collector.record_job("commit-analysis", "completed", 1.5);

        let _ = init_metrics();
        collector.record_job("commit-analysis", "failed", 0.2);
        collector.record_llm_request("gpt-4o", true, 2.5, TokenUsage::new(1000, 200));
        collector.record_fallback(FallbackKind::Review, 1);
        collector.record_fallback(FallbackKind::Parse, 0);
        collector.record_quality(85);
        collector.update_queue_depth("documentation", "waiting", 3);
        collector.update_workers("documentation", 2);
        collector.inc_jobs_in_progress();
        collector.dec_jobs_in_progress();

        let text = export_metrics();
        assert!(text.contains("commitlens_fallbacks_total"));
        assert!(text.contains("commitlens_queue_depth"));
    }
}
