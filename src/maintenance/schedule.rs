//! Periodic task runner.
//!
//! Each registered task runs on its own tokio task at a fixed interval. A run
//! executes in a separate spawned task, so an error or panic in one run is
//! logged and recorded without affecting later runs or other schedules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Errors raised when configuring or driving schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Task '{0}' is already scheduled")]
    DuplicateTask(String),

    #[error("Task '{0}' needs a non-zero interval")]
    InvalidInterval(String),

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Schedules are already running")]
    AlreadyRunning,

    #[error("Schedules are not running")]
    NotRunning,

    #[error("Task run failed: {0}")]
    RunFailed(String),
}

/// Work executed on a schedule.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`PeriodicTask`].
pub struct FnTask<F>(pub F);

#[async_trait]
impl<F> PeriodicTask for FnTask<F>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Run history of one scheduled task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskRunStats {
    pub name: String,
    pub interval_secs: u64,
    pub runs: u64,
    pub failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct Schedule {
    name: String,
    interval: Duration,
    run_immediately: bool,
    task: Arc<dyn PeriodicTask>,
}

type SharedStats = Arc<Mutex<HashMap<String, TaskRunStats>>>;

/// Owns a set of named periodic tasks with explicit start and stop.
pub struct ScheduleManager {
    schedules: Vec<Schedule>,
    stats: SharedStats,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for ScheduleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            schedules: Vec::new(),
            stats: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Registers a task that first runs one `interval` after start.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        task: Arc<dyn PeriodicTask>,
    ) -> Result<(), ScheduleError> {
        self.register(name.into(), interval, false, task)
    }

    /// Registers a task that also runs once right at start.
    pub fn add_immediate(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        task: Arc<dyn PeriodicTask>,
    ) -> Result<(), ScheduleError> {
        self.register(name.into(), interval, true, task)
    }

    fn register(
        &mut self,
        name: String,
        interval: Duration,
        run_immediately: bool,
        task: Arc<dyn PeriodicTask>,
    ) -> Result<(), ScheduleError> {
        if self.is_running() {
            return Err(ScheduleError::AlreadyRunning);
        }
        if interval.is_zero() {
            return Err(ScheduleError::InvalidInterval(name));
        }
        if self.schedules.iter().any(|s| s.name == name) {
            return Err(ScheduleError::DuplicateTask(name));
        }

        self.stats.lock().expect("schedule stats lock poisoned").insert(
            name.clone(),
            TaskRunStats {
                name: name.clone(),
                interval_secs: interval.as_secs(),
                ..Default::default()
            },
        );
        self.schedules.push(Schedule {
            name,
            interval,
            run_immediately,
            task,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawns one loop per schedule.
    pub fn start(&mut self) -> Result<(), ScheduleError> {
        if self.is_running() {
            return Err(ScheduleError::AlreadyRunning);
        }

        for schedule in &self.schedules {
            let name = schedule.name.clone();
            let interval = schedule.interval;
            let run_immediately = schedule.run_immediately;
            let task = Arc::clone(&schedule.task);
            let stats = Arc::clone(&self.stats);
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            self.handles.push(tokio::spawn(async move {
                let start = if run_immediately {
                    tokio::time::Instant::now()
                } else {
                    tokio::time::Instant::now() + interval
                };
                let mut ticker = tokio::time::interval_at(start, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let _ = execute(&name, &task, &stats).await;
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
                debug!(task = %name, "Schedule stopped");
            }));
        }

        info!(tasks = self.schedules.len(), "Schedules started");
        Ok(())
    }

    /// Stops every schedule; an in-flight run is allowed to finish.
    pub async fn stop(&mut self) -> Result<(), ScheduleError> {
        if !self.is_running() {
            return Err(ScheduleError::NotRunning);
        }
        let _ = self.shutdown_tx.send(());
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Schedule loop panicked");
            }
        }
        info!("Schedules stopped");
        Ok(())
    }

    /// Runs a task once outside its schedule.
    pub async fn run_now(&self, name: &str) -> Result<(), ScheduleError> {
        let schedule = self
            .schedules
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ScheduleError::UnknownTask(name.to_string()))?;
        execute(&schedule.name, &schedule.task, &self.stats)
            .await
            .map_err(ScheduleError::RunFailed)
    }

    pub fn stats(&self) -> Vec<TaskRunStats> {
        let stats = self.stats.lock().expect("schedule stats lock poisoned");
        let mut all: Vec<TaskRunStats> = stats.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Runs one task invocation in isolation and records the outcome.
async fn execute(
    name: &str,
    task: &Arc<dyn PeriodicTask>,
    stats: &SharedStats,
) -> Result<(), String> {
    let task = Arc::clone(task);
    let outcome = match tokio::spawn(async move { task.run().await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(join_error) => Err(format!("task panicked: {join_error}")),
    };

    match &outcome {
        Ok(()) => debug!(task = name, "Scheduled task finished"),
        Err(e) => warn!(task = name, error = %e, "Scheduled task failed"),
    }

    let mut stats = stats.lock().expect("schedule stats lock poisoned");
    if let Some(entry) = stats.get_mut(name) {
        entry.runs += 1;
        entry.last_run_at = Some(Utc::now());
        match &outcome {
            Ok(()) => entry.last_error = None,
            Err(e) => {
                entry.failures += 1;
                entry.last_error = Some(e.clone());
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_task(counter: Arc<AtomicU32>) -> Arc<dyn PeriodicTask> {
        Arc::new(FnTask(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        }))
    }

    #[test]
    fn test_add_validation() {
        let mut manager = ScheduleManager::new();
        let counter = Arc::new(AtomicU32::new(0));

        assert!(matches!(
            manager.add("cleanup", Duration::ZERO, counting_task(counter.clone())),
            Err(ScheduleError::InvalidInterval(_))
        ));
        manager
            .add("cleanup", Duration::from_secs(60), counting_task(counter.clone()))
            .expect("add");
        assert!(matches!(
            manager.add("cleanup", Duration::from_secs(5), counting_task(counter)),
            Err(ScheduleError::DuplicateTask(_))
        ));
        assert_eq!(manager.stats().len(), 1);
        assert_eq!(manager.stats()[0].interval_secs, 60);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_stop_others() {
        let mut manager = ScheduleManager::new();
        let healthy = Arc::new(AtomicU32::new(0));
        let failing_runs = Arc::new(AtomicU32::new(0));
        let failing_counter = Arc::clone(&failing_runs);

        manager
            .add_immediate("healthy", Duration::from_millis(10), counting_task(healthy.clone()))
            .expect("add");
        manager
            .add_immediate(
                "failing",
                Duration::from_millis(10),
                Arc::new(FnTask(move || {
                    let counter = Arc::clone(&failing_counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                            panic!("boom");
                        }
                        Err::<(), _>(anyhow::anyhow!("webhook drain failed"))
                    }
                    .boxed()
                })),
            )
            .expect("add");

        manager.start().expect("start");
        tokio::time::sleep(Duration::from_millis(120)).await;
        manager.stop().await.expect("stop");

        assert!(healthy.load(Ordering::SeqCst) >= 3);
        assert!(failing_runs.load(Ordering::SeqCst) >= 3);

        let stats = manager.stats();
        let failing = stats.iter().find(|s| s.name == "failing").expect("stats");
        assert_eq!(failing.runs, failing.failures);
        assert!(failing.last_error.is_some());
        let healthy_stats = stats.iter().find(|s| s.name == "healthy").expect("stats");
        assert_eq!(healthy_stats.failures, 0);
    }

    #[tokio::test]
    async fn test_run_now_and_lifecycle() {
        let mut manager = ScheduleManager::new();
        let counter = Arc::new(AtomicU32::new(0));
        manager
            .add("cleanup", Duration::from_secs(3600), counting_task(counter.clone()))
            .expect("add");

        manager.run_now("cleanup").await.expect("run");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.run_now("missing").await,
            Err(ScheduleError::UnknownTask(_))
        ));

        assert!(matches!(manager.stop().await, Err(ScheduleError::NotRunning)));
        manager.start().expect("start");
        assert!(matches!(manager.start(), Err(ScheduleError::AlreadyRunning)));
        manager.stop().await.expect("stop");
        // Not due within the test window.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
