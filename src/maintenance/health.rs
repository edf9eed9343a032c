//! Aggregate service health.
//!
//! The checker polls a set of dependency probes (queue broker and store,
//! worker pools) plus host memory, and folds them into one status:
//! Unhealthy if any dependency is unhealthy or memory is above the unhealthy
//! threshold, Degraded if any is degraded or memory is above the degraded
//! threshold, Healthy otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{info, warn};

use crate::scheduler::{JobQueue, JobType};

/// Health of a component or of the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Result of one dependency probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Memory in use on the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryUsage {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    /// Samples the host through `sysinfo`.
    pub fn sample() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            used_bytes: system.used_memory(),
            total_bytes: system.total_memory(),
        }
    }
}

/// Memory percentages at which health drops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryThresholds {
    pub degraded_percent: f64,
    pub unhealthy_percent: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            degraded_percent: 80.0,
            unhealthy_percent: 90.0,
        }
    }
}

/// Snapshot returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub memory: MemoryUsage,
    pub memory_percent: f64,
    pub checked_at: DateTime<Utc>,
}

/// A dependency whose readiness contributes to overall health.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> ComponentHealth;
}

/// Checks that the queue broker and job store answer, and flags paused queues.
pub struct QueueProbe {
    queue: Arc<JobQueue>,
}

impl QueueProbe {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl HealthProbe for QueueProbe {
    async fn check(&self) -> ComponentHealth {
        if let Err(e) = self.queue.ping().await {
            return ComponentHealth::unhealthy("queue", e.to_string());
        }

        let mut paused = Vec::new();
        for job_type in JobType::ALL {
            match self.queue.is_paused(job_type).await {
                Ok(true) => paused.push(job_type.queue_name()),
                Ok(false) => {}
                Err(e) => return ComponentHealth::unhealthy("queue", e.to_string()),
            }
        }

        if paused.is_empty() {
            ComponentHealth::healthy("queue")
        } else {
            ComponentHealth::degraded("queue", format!("paused: {}", paused.join(", ")))
        }
    }
}

/// Reports whether the worker pools are running.
pub struct PoolProbe {
    ready: Arc<AtomicBool>,
}

impl PoolProbe {
    pub fn new(ready: Arc<AtomicBool>) -> Self {
        Self { ready }
    }
}

#[async_trait]
impl HealthProbe for PoolProbe {
    async fn check(&self) -> ComponentHealth {
        if self.ready.load(Ordering::SeqCst) {
            ComponentHealth::healthy("workers")
        } else {
            ComponentHealth::unhealthy("workers", "worker pools are not running")
        }
    }
}

type MemorySampler = Arc<dyn Fn() -> MemoryUsage + Send + Sync>;

/// Folds probes and memory into a [`HealthReport`].
pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    thresholds: MemoryThresholds,
    sampler: MemorySampler,
    latest: RwLock<Option<HealthReport>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            probes: Vec::new(),
            thresholds: MemoryThresholds::default(),
            sampler: Arc::new(MemoryUsage::sample),
            latest: RwLock::new(None),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_thresholds(mut self, thresholds: MemoryThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Replaces the host memory sampler.
    pub fn with_memory_sampler(
        mut self,
        sampler: impl Fn() -> MemoryUsage + Send + Sync + 'static,
    ) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    /// Polls every probe and stores the result as the latest snapshot.
    pub async fn check(&self) -> HealthReport {
        let components = futures::future::join_all(self.probes.iter().map(|p| p.check())).await;
        let memory = (self.sampler)();
        let report = HealthReport {
            status: overall_status(&components, memory.percent(), self.thresholds),
            memory_percent: memory.percent(),
            components,
            memory,
            checked_at: Utc::now(),
        };

        if report.status != HealthStatus::Healthy {
            warn!(
                status = report.status.as_str(),
                memory_percent = report.memory_percent,
                "Service health check not healthy"
            );
        }
        *self.latest.write().expect("health lock poisoned") = Some(report.clone());
        report
    }

    /// Last snapshot taken by [`check`](Self::check).
    pub fn latest(&self) -> Option<HealthReport> {
        self.latest.read().expect("health lock poisoned").clone()
    }

    /// Runs a check and logs the transition from the previous snapshot.
    pub async fn snapshot(&self) -> HealthReport {
        let previous = self.latest().map(|r| r.status);
        let report = self.check().await;
        if previous.is_some_and(|p| p != report.status) {
            info!(
                from = previous.map(|p| p.as_str()).unwrap_or("unknown"),
                to = report.status.as_str(),
                "Service health changed"
            );
        }
        report
    }
}

/// Worst of the component statuses and the memory status.
pub fn overall_status(
    components: &[ComponentHealth],
    memory_percent: f64,
    thresholds: MemoryThresholds,
) -> HealthStatus {
    let memory = if memory_percent > thresholds.unhealthy_percent {
        HealthStatus::Unhealthy
    } else if memory_percent > thresholds.degraded_percent {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    components
        .iter()
        .map(|c| c.status)
        .chain(std::iter::once(memory))
        .max()
        .unwrap_or(HealthStatus::Healthy)
}
