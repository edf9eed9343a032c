//! HTTP surface.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /jobs` | enqueue a job |
//! | `GET /jobs/{id}` | job status, progress and result |
//! | `GET /queues/stats` | per-queue counts |
//! | `POST /queues/{queue}/pause` | stop leasing from a queue |
//! | `POST /queues/{queue}/resume` | resume leasing |
//! | `GET /analyses` | stored results filtered by repository, kind, revision |
//! | `GET /analyses/{id}` | one stored result |
//! | `GET /repositories/rollup` | latest repository rollup |
//! | `POST /webhooks/push` | buffer a push event |
//! | `GET /health` | health snapshot |
//! | `GET /metrics` | Prometheus text format |

mod handlers;

pub use handlers::ApiError;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::maintenance::{HealthChecker, WebhookInbox};
use crate::scheduler::JobQueue;
use crate::storage::AnalysisStore;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub results: Arc<dyn AnalysisStore>,
    pub inbox: Arc<dyn WebhookInbox>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(
        queue: Arc<JobQueue>,
        results: Arc<dyn AnalysisStore>,
        inbox: Arc<dyn WebhookInbox>,
        health: Arc<HealthChecker>,
    ) -> Self {
        Self {
            queue,
            results,
            inbox,
            health,
        }
    }
}

/// Builds the router with every route.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Jobs
        .route("/jobs", post(handlers::enqueue_job))
        .route("/jobs/{id}", get(handlers::get_job))
        // Queues
        .route("/queues/stats", get(handlers::queue_stats))
        .route("/queues/{queue}/pause", post(handlers::pause_queue))
        .route("/queues/{queue}/resume", post(handlers::resume_queue))
        // Results
        .route("/analyses", get(handlers::list_analyses))
        .route("/analyses/{id}", get(handlers::get_analysis))
        .route("/repositories/rollup", get(handlers::get_rollup))
        // Intake
        .route("/webhooks/push", post(handlers::push_webhook))
        // Operations
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}

/// Serves the API on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
