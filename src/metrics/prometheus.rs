//! Prometheus metrics registration and export.
//!
//! All metrics live in one registry that is created by [`init_metrics`].
//! Recording before initialization is a no-op.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Registry holding every commitlens metric.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Jobs resolved, labeled by queue and outcome (completed, retrying, failed).
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job handler duration in seconds, labeled by queue.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Jobs per queue and state (waiting, delayed, paused, active).
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Jobs currently being processed across all pools.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Running workers, labeled by queue.
pub static ACTIVE_WORKERS: OnceLock<GaugeVec> = OnceLock::new();

/// LLM review requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Degraded results, labeled by kind (parse, review).
pub static FALLBACKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Distribution of per-file quality scores.
pub static QUALITY_SCORE: OnceLock<Histogram> = OnceLock::new();

/// Creates and registers all metrics.
///
/// Safe to call more than once; later calls leave the first registry in place.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let jobs_total = CounterVec::new(
        Opts::new("commitlens_jobs_total", "Total number of resolved jobs"),
        &["queue", "outcome"],
    )?;

    let job_duration = HistogramVec::new(
        HistogramOpts::new(
            "commitlens_job_duration_seconds",
            "Job handler duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 600.0]),
        &["queue"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("commitlens_queue_depth", "Number of jobs per queue and state"),
        &["queue", "state"],
    )?;

    let jobs_in_progress = Gauge::new(
        "commitlens_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    let active_workers = GaugeVec::new(
        Opts::new("commitlens_active_workers", "Number of running workers"),
        &["queue"],
    )?;

    let llm_requests_total = CounterVec::new(
        Opts::new("commitlens_llm_requests_total", "Total LLM review requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "commitlens_llm_latency_seconds",
            "LLM request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("commitlens_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    let fallbacks_total = CounterVec::new(
        Opts::new(
            "commitlens_fallbacks_total",
            "Results produced by a lower-fidelity fallback",
        ),
        &["kind"],
    )?;

    let quality_score = Histogram::with_opts(
        HistogramOpts::new("commitlens_quality_score", "Distribution of file quality scores")
            .buckets(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]),
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(fallbacks_total.clone()))?;
    registry.register(Box::new(quality_score.clone()))?;

    // Already-set cells mean a previous call won; keep its metrics.
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = FALLBACKS_TOTAL.set(fallbacks_total);
    let _ = QUALITY_SCORE.set(quality_score);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Encodes all registered metrics in the Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
