//! Route handlers and their error mapping.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::maintenance::{HealthStatus, InboxError, PushEvent};
use crate::metrics::export_metrics;
use crate::scheduler::{EnqueueRequest, JobType, QueueError};
use crate::storage::{AnalysisFilter, AnalysisKind, StorageError};

/// Errors returned to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inbox(#[from] InboxError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Queue(e) => match e {
                QueueError::InvalidPayload { .. }
                | QueueError::InvalidRequest(_)
                | QueueError::UnknownJobType(_) => StatusCode::BAD_REQUEST,
                QueueError::UnknownQueue(_) | QueueError::JobNotFound(_) => StatusCode::NOT_FOUND,
                e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Inbox(InboxError::InvalidEvent(_)) => StatusCode::BAD_REQUEST,
            ApiError::Inbox(InboxError::Queue(e)) if !e.is_transient() => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Inbox(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Queue(_) => "queue_error",
            ApiError::Storage(_) => "storage_error",
            ApiError::Inbox(_) => "webhook_error",
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, status = status.as_u16(), "API request failed");
        }

        let body = json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct Enqueued {
    id: Uuid,
    queue: &'static str,
}

/// `POST /jobs`
pub(super) async fn enqueue_job(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    // Resolve the type first so an unknown one is reported as such rather
    // than as a generic deserialization failure.
    let type_name = body
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("missing job type".to_string()))?;
    let job_type: JobType = type_name
        .parse()
        .map_err(|_| QueueError::UnknownJobType(type_name.to_string()))?;

    let request: EnqueueRequest =
        serde_json::from_value(body).map_err(|e| QueueError::InvalidRequest(e.to_string()))?;
    let id = state.queue.enqueue(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(Enqueued {
            id,
            queue: job_type.queue_name(),
        }),
    ))
}

/// `GET /jobs/{id}`
pub(super) async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .queue
        .get_job(id)
        .await?
        .ok_or(QueueError::JobNotFound(id))?;

    let mut view = serde_json::to_value(&job).map_err(StorageError::from)?;
    redact_credentials(&mut view);
    Ok(Json(view))
}

/// Strips repository credentials from a serialized job.
fn redact_credentials(job: &mut Value) {
    if let Some(repository) = job
        .pointer_mut("/payload/repository")
        .and_then(Value::as_object_mut)
    {
        repository.remove("credential");
    }
}

/// `GET /queues/stats`
pub(super) async fn queue_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.queue.all_stats().await?;
    Ok(Json(json!({ "queues": stats })))
}

/// `POST /queues/{queue}/pause`
pub(super) async fn pause_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job_type = JobType::from_queue_name(&queue).ok_or(QueueError::UnknownQueue(queue.clone()))?;
    state.queue.pause(job_type).await?;
    info!(queue = %queue, "Queue paused");
    Ok(Json(json!({ "queue": queue, "paused": true })))
}

/// `POST /queues/{queue}/resume`
pub(super) async fn resume_queue(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job_type = JobType::from_queue_name(&queue).ok_or(QueueError::UnknownQueue(queue.clone()))?;
    state.queue.resume(job_type).await?;
    info!(queue = %queue, "Queue resumed");
    Ok(Json(json!({ "queue": queue, "paused": false })))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct AnalysisQuery {
    repository: Option<String>,
    kind: Option<String>,
    revision: Option<String>,
    limit: Option<usize>,
}

impl AnalysisQuery {
    fn into_filter(self) -> Result<AnalysisFilter, ApiError> {
        let mut filter = AnalysisFilter::new();
        filter.repository = self.repository;
        filter.revision = self.revision;
        if let Some(kind) = self.kind {
            let kind = AnalysisKind::parse(&kind)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown analysis kind '{kind}'")))?;
            filter = filter.with_kind(kind);
        }
        if let Some(limit) = self.limit {
            filter = filter.with_limit(limit);
        }
        Ok(filter)
    }
}

/// `GET /analyses`
pub(super) async fn list_analyses(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = query.into_filter()?;
    let records = state.results.find(&filter).await?;
    Ok(Json(json!({ "count": records.len(), "analyses": records })))
}

/// `GET /analyses/{id}`
pub(super) async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .results
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("analysis {id} not found")))?;
    Ok(Json(serde_json::to_value(record).map_err(StorageError::from)?))
}

#[derive(Debug, Deserialize)]
pub(super) struct RollupQuery {
    repository: String,
}

/// `GET /repositories/rollup?repository=<url>`
pub(super) async fn get_rollup(
    State(state): State<AppState>,
    Query(query): Query<RollupQuery>,
) -> Result<Json<Value>, ApiError> {
    let rollup = state
        .results
        .get_rollup(&query.repository)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no rollup for {}", query.repository)))?;
    Ok(Json(serde_json::to_value(rollup).map_err(StorageError::from)?))
}

/// `POST /webhooks/push`
pub(super) async fn push_webhook(
    State(state): State<AppState>,
    Json(event): Json<PushEvent>,
) -> Result<impl IntoResponse, ApiError> {
    event.validate()?;
    let commits = event.commits.len();
    state.inbox.push(event).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": commits }))))
}

/// `GET /health`
pub(super) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.snapshot().await;
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

/// `GET /metrics`
pub(super) async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        export_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::maintenance::{HealthChecker, MemoryInbox, MemoryUsage, QueueProbe, WebhookInbox};
    use crate::scheduler::JobQueue;
    use crate::storage::{AnalysisRecord, AnalysisStore, MemoryAnalysisStore};
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        queue: Arc<JobQueue>,
        results: Arc<MemoryAnalysisStore>,
        inbox: Arc<MemoryInbox>,
    }

    fn harness() -> Harness {
        let queue = Arc::new(JobQueue::in_memory());
        let results = Arc::new(MemoryAnalysisStore::new());
        let inbox = Arc::new(MemoryInbox::new());
        let health = Arc::new(
            HealthChecker::new()
                .with_probe(Arc::new(QueueProbe::new(queue.clone())))
                .with_memory_sampler(|| MemoryUsage {
                    used_bytes: 1,
                    total_bytes: 4,
                }),
        );
        let app = router(AppState::new(
            queue.clone(),
            results.clone(),
            inbox.clone(),
            health,
        ));
        Harness {
            app,
            queue,
            results,
            inbox,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn commit_job() -> Value {
        json!({
            "type": "analyze_commit",
            "payload": {
                "repository": {"url": "https://example.com/a.git", "credential": "s3cret"},
                "commit_sha": "abc123"
            },
            "priority": 5
        })
    }

    #[tokio::test]
    async fn test_enqueue_and_fetch_job() {
        let h = harness();
        let (status, body) = send(&h.app, "POST", "/jobs", Some(commit_job())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["queue"], "commit-analysis");

        let id = body["id"].as_str().expect("id");
        let (status, job) = send(&h.app, "GET", &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "queued");
        assert_eq!(job["priority"], 5);
        assert_eq!(job["payload"]["commit_sha"], "abc123");
        assert!(job["payload"]["repository"].get("credential").is_none());
    }

    #[tokio::test]
    async fn test_enqueue_rejections() {
        let h = harness();

        let (status, body) = send(
            &h.app,
            "POST",
            "/jobs",
            Some(json!({"type": "compile_kernel", "payload": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"]
            .as_str()
            .expect("message")
            .contains("compile_kernel"));

        let (status, _) = send(
            &h.app,
            "POST",
            "/jobs",
            Some(json!({"type": "analyze_commit", "payload": {"commit_sha": "abc"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let stats = h.queue.stats(JobType::AnalyzeCommit).await.expect("stats");
        assert_eq!(stats.pending(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let h = harness();
        let (status, body) = send(&h.app, "GET", &format!("/jobs/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "queue_error");
    }

    #[tokio::test]
    async fn test_pause_resume_and_stats() {
        let h = harness();
        send(&h.app, "POST", "/jobs", Some(commit_job())).await;

        let (status, _) = send(&h.app, "POST", "/queues/commit-analysis/pause", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, stats) = send(&h.app, "GET", "/queues/stats", None).await;
        let commit = stats["queues"]
            .as_array()
            .expect("queues")
            .iter()
            .find(|q| q["queue"] == "commit-analysis")
            .expect("commit queue")
            .clone();
        assert_eq!(commit["paused"], 1);
        assert_eq!(commit["waiting"], 0);

        send(&h.app, "POST", "/queues/commit-analysis/resume", None).await;
        assert!(!h.queue.is_paused(JobType::AnalyzeCommit).await.expect("paused"));

        let (status, _) = send(&h.app, "POST", "/queues/nope/pause", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_push_is_buffered() {
        let h = harness();
        let event = json!({
            "repository": {"url": "https://example.com/a.git", "branch": "main"},
            "commits": ["c1", "c2"]
        });
        let (status, body) = send(&h.app, "POST", "/webhooks/push", Some(event)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], 2);
        assert_eq!(h.inbox.len().await.expect("len"), 1);

        let empty = json!({"repository": {"url": "https://example.com/a.git"}, "commits": []});
        let (status, _) = send(&h.app, "POST", "/webhooks/push", Some(empty)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analysis_queries() {
        let h = harness();
        let record = AnalysisRecord::new(
            Uuid::new_v4(),
            AnalysisKind::Commit,
            "https://example.com/a.git",
            "abc123",
            json!({"risk_level": "low"}),
        );
        let id = h.results.save(&record).await.expect("save");

        let (status, body) = send(
            &h.app,
            "GET",
            "/analyses?repository=https://example.com/a.git&kind=commit",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, body) = send(&h.app, "GET", &format!("/analyses/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["revision"], "abc123");

        let (status, _) = send(&h.app, "GET", "/analyses?kind=weird", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &h.app,
            "GET",
            "/repositories/rollup?repository=https://example.com/none.git",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let h = harness();
        let (status, body) = send(&h.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["memory_percent"], 25.0);
    }

    #[test]
    fn test_redact_credentials() {
        let mut job = json!({"payload": {"repository": {"url": "u", "credential": "t"}}});
        redact_credentials(&mut job);
        assert_eq!(job, json!({"payload": {"repository": {"url": "u"}}}));

        let mut other = json!({"payload": {"repository": "u"}});
        redact_credentials(&mut other);
        assert_eq!(other["payload"]["repository"], "u");
    }
}
