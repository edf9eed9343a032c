//! Job handlers and the progress channel they report through.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::job::{Job, JobProgress, JobType};
use crate::error::JobError;

/// Executes jobs of one type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job and returns its result document.
    async fn handle(&self, job: &Job, progress: ProgressReporter) -> Result<serde_json::Value, JobError>;
}

/// A progress update addressed to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub job_id: Uuid,
    pub progress: JobProgress,
}

/// Fire-and-forget progress callback handed to handlers.
///
/// Reporting never blocks; updates sent after the collector is gone are dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: Uuid,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub fn new(job_id: Uuid, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            job_id,
            tx: Some(tx),
        }
    }

    /// A reporter that discards every update.
    pub fn noop(job_id: Uuid) -> Self {
        Self { job_id, tx: None }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Records `percent` (clamped to 100) with a short message.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let update = ProgressUpdate {
            job_id: self.job_id,
            progress: JobProgress {
                percent: percent.min(100),
                message: message.into(),
                updated_at: Utc::now(),
            },
        };
        if tx.send(update).is_err() {
            tracing::trace!(job_id = %self.job_id, "Progress collector closed; update dropped");
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .field("connected", &self.tx.is_some())
            .finish()
    }
}

/// Handlers registered per job type at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for a job type, replacing any previous one.
    pub fn register(mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type, handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    /// Job types with a registered handler, in declaration order.
    pub fn job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        async fn handle(
            &self,
            job: &Job,
            progress: ProgressReporter,
        ) -> Result<serde_json::Value, JobError> {
            progress.report(50, "halfway");
            Ok(job.payload.clone())
        }
    }

    #[tokio::test]
    async fn test_progress_reporter_sends_clamped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let reporter = ProgressReporter::new(id, tx);

        reporter.report(250, "done");
        let update = rx.recv().await.expect("update");
        assert_eq!(update.job_id, id);
        assert_eq!(update.progress.percent, 100);
        assert_eq!(update.progress.message, "done");
    }

    #[test]
    fn test_report_after_close_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let reporter = ProgressReporter::new(Uuid::new_v4(), tx);
        reporter.report(10, "ignored");
        ProgressReporter::noop(Uuid::new_v4()).report(10, "ignored");
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = HandlerRegistry::new().register(JobType::GenerateDocs, Arc::new(Echo));
        assert_eq!(registry.job_types(), vec![JobType::GenerateDocs]);
        assert!(registry.get(JobType::AnalyzeCommit).is_none());

        let job = Job::new(JobType::GenerateDocs, json!({"k": 1}));
        let handler = registry.get(JobType::GenerateDocs).expect("handler");
        let result = handler
            .handle(&job, ProgressReporter::noop(job.id))
            .await
            .expect("handled");
        assert_eq!(result, json!({"k": 1}));
    }
}
