//! Periodic maintenance: schedules, health and webhook intake.
//!
//! The standard schedule set run by `serve` and `work`:
//!
//! | Task | Work |
//! |------|------|
//! | `job-cleanup` | delete terminal jobs past retention |
//! | `stale-recovery` | fail abandoned leases back into the retry protocol |
//! | `queue-resync` | republish pending jobs a failed broker step left unpublished |
//! | `webhook-drain` | turn buffered push events into commit jobs |
//! | `health-snapshot` | refresh the health report |

pub mod health;
pub mod schedule;
pub mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use health::{
    ComponentHealth, HealthChecker, HealthProbe, HealthReport, HealthStatus, MemoryThresholds,
    MemoryUsage, PoolProbe, QueueProbe,
};
pub use schedule::{FnTask, PeriodicTask, ScheduleError, ScheduleManager, TaskRunStats};
pub use webhooks::{InboxError, MemoryInbox, PushEvent, RedisInbox, WebhookDrainer, WebhookInbox};

use crate::scheduler::{JobQueue, JobType};

/// Deletes finished jobs older than the retention window.
pub struct CleanupTask {
    queue: Arc<JobQueue>,
    retention: Duration,
}

impl CleanupTask {
    pub fn new(queue: Arc<JobQueue>, retention: Duration) -> Self {
        Self { queue, retention }
    }
}

#[async_trait]
impl PeriodicTask for CleanupTask {
    async fn run(&self) -> anyhow::Result<()> {
        self.queue.cleanup(self.retention).await?;
        Ok(())
    }
}

/// Recovers jobs whose lease outlived `lease_timeout`.
pub struct StaleRecoveryTask {
    queue: Arc<JobQueue>,
    lease_timeout: Duration,
}

impl StaleRecoveryTask {
    pub fn new(queue: Arc<JobQueue>, lease_timeout: Duration) -> Self {
        Self {
            queue,
            lease_timeout,
        }
    }
}

#[async_trait]
impl PeriodicTask for StaleRecoveryTask {
    async fn run(&self) -> anyhow::Result<()> {
        self.queue.recover_stale(self.lease_timeout).await?;
        Ok(())
    }
}

/// Republishes `Queued` and `Retrying` jobs of every type from the store.
pub struct ResyncTask {
    queue: Arc<JobQueue>,
}

impl ResyncTask {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl PeriodicTask for ResyncTask {
    async fn run(&self) -> anyhow::Result<()> {
        for job_type in JobType::ALL {
            self.queue.resync(job_type).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for WebhookDrainer {
    async fn run(&self) -> anyhow::Result<()> {
        self.drain().await?;
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for HealthChecker {
    async fn run(&self) -> anyhow::Result<()> {
        self.snapshot().await;
        Ok(())
    }
}

/// Intervals of the standard schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceIntervals {
    pub cleanup: Duration,
    pub stale_recovery: Duration,
    pub resync: Duration,
    pub webhook_drain: Duration,
    pub health: Duration,
}

impl Default for MaintenanceIntervals {
    fn default() -> Self {
        Self {
            cleanup: Duration::from_secs(3600),
            stale_recovery: Duration::from_secs(60),
            resync: Duration::from_secs(30),
            webhook_drain: Duration::from_secs(5),
            health: Duration::from_secs(30),
        }
    }
}

/// Builds the standard schedule set.
pub fn standard_schedules(
    queue: Arc<JobQueue>,
    inbox: Arc<dyn WebhookInbox>,
    health: Arc<HealthChecker>,
    intervals: MaintenanceIntervals,
    retention: Duration,
    lease_timeout: Duration,
) -> Result<ScheduleManager, ScheduleError> {
    let mut manager = ScheduleManager::new();
    manager.add(
        "job-cleanup",
        intervals.cleanup,
        Arc::new(CleanupTask::new(Arc::clone(&queue), retention)),
    )?;
    manager.add(
        "stale-recovery",
        intervals.stale_recovery,
        Arc::new(StaleRecoveryTask::new(Arc::clone(&queue), lease_timeout)),
    )?;
    manager.add(
        "queue-resync",
        intervals.resync,
        Arc::new(ResyncTask::new(Arc::clone(&queue))),
    )?;
    manager.add(
        "webhook-drain",
        intervals.webhook_drain,
        Arc::new(WebhookDrainer::new(inbox, queue)),
    )?;
    manager.add_immediate("health-snapshot", intervals.health, health)?;
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{EnqueueRequest, MemoryBroker, MemoryJobStore, JobStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_standard_schedules_run() {
        let queue = Arc::new(JobQueue::in_memory());
        let inbox: Arc<dyn WebhookInbox> = Arc::new(MemoryInbox::new());
        let health = Arc::new(HealthChecker::new().with_memory_sampler(|| MemoryUsage {
            used_bytes: 1,
            total_bytes: 10,
        }));

        let manager = standard_schedules(
            queue.clone(),
            inbox.clone(),
            health.clone(),
            MaintenanceIntervals::default(),
            Duration::ZERO,
            Duration::from_secs(600),
        )
        .expect("schedules");
        let names: Vec<String> = manager.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "health-snapshot",
                "job-cleanup",
                "queue-resync",
                "stale-recovery",
                "webhook-drain"
            ]
        );

        inbox
            .push(PushEvent::new(
                crate::source::RepositoryRef::new("https://example.com/r.git"),
                vec!["abc".to_string()],
            ))
            .await
            .expect("push");
        manager.run_now("webhook-drain").await.expect("drain");
        let stats = queue.stats(JobType::AnalyzeCommit).await.expect("stats");
        assert_eq!(stats.waiting, 1);

        manager.run_now("health-snapshot").await.expect("health");
        assert_eq!(
            health.latest().map(|r| r.status),
            Some(HealthStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_resync_task_republishes_every_queue() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let before = JobQueue::new(store.clone(), Arc::new(MemoryBroker::new()));
        before
            .enqueue(EnqueueRequest::new(
                JobType::GenerateDocs,
                json!({"repository": {"url": "u"}}),
            ))
            .await
            .expect("enqueue docs");
        before
            .enqueue(EnqueueRequest::new(
                JobType::AnalyzeCommit,
                json!({"repository": {"url": "u"}, "commit_sha": "abc"}),
            ))
            .await
            .expect("enqueue commit");

        // Same store, empty broker.
        let queue = Arc::new(JobQueue::new(store, Arc::new(MemoryBroker::new())));
        assert_eq!(queue.stats(JobType::GenerateDocs).await.expect("stats").waiting, 0);

        ResyncTask::new(queue.clone()).run().await.expect("resync");
        ResyncTask::new(queue.clone()).run().await.expect("resync twice");
        assert_eq!(queue.stats(JobType::GenerateDocs).await.expect("stats").waiting, 1);
        assert_eq!(queue.stats(JobType::AnalyzeCommit).await.expect("stats").waiting, 1);
    }

    #[tokio::test]
    async fn test_cleanup_task_uses_retention() {
        let queue = Arc::new(JobQueue::in_memory());
        queue
            .enqueue(EnqueueRequest::new(
                JobType::GenerateDocs,
                json!({"repository": {"url": "u"}}),
            ))
            .await
            .expect("enqueue");
        let job = queue.lease(JobType::GenerateDocs).await.expect("lease").expect("job");
        queue.complete(&job, json!(null)).await.expect("complete");

        CleanupTask::new(queue.clone(), Duration::from_secs(3600))
            .run()
            .await
            .expect("cleanup");
        assert!(queue.get_job(job.id).await.expect("get").is_some());

        CleanupTask::new(queue.clone(), Duration::ZERO)
            .run()
            .await
            .expect("cleanup");
        assert!(queue.get_job(job.id).await.expect("get").is_none());
    }
}
