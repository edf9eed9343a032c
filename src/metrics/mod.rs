//! Prometheus-based monitoring.
//!
//! Covers job throughput and duration, queue depth, worker counts, LLM usage
//! and degraded (fallback) results. Exported at `GET /metrics`.
//!
//! # Example
//!
//! ```ignore
//! use commitlens::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! let collector = MetricsCollector::new();
//! collector.record_job("commit-analysis", "completed", 3.2);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{FallbackKind, MetricsCollector, TokenUsage};
pub use prometheus::{export_metrics, init_metrics};
