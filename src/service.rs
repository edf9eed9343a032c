//! Service assembly.
//!
//! Turns a [`ServiceConfig`] into running collaborators: Redis or in-process
//! broker, PostgreSQL or in-memory stores, the git source, the reviewer and
//! the shared processor context. [`Service::start_workers`] then starts the
//! worker pools and the maintenance schedules together.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::analysis::{CodeParser, CommitAnalyzer, ParsedCodeCache};
use crate::api::AppState;
use crate::config::{ConfigError, ServiceConfig};
use crate::error::LlmError;
use crate::llm::{CommitReviewer, LiteLlmClient, RateLimiter, ReviewConfig};
use crate::maintenance::{
    standard_schedules, HealthChecker, MaintenanceIntervals, MemoryInbox, PoolProbe, QueueProbe,
    RedisInbox, ScheduleError, ScheduleManager, WebhookInbox,
};
use crate::processors::{handler_registry, ProcessorContext};
use crate::scheduler::redis_broker::DEFAULT_PREFIX;
use crate::scheduler::{
    BrokerError, JobQueue, JobStore, MemoryBroker, MemoryJobStore, PoolError, PoolSet,
    QueueBroker, RedisBroker,
};
use crate::source::{GitCliSource, SourceProvider};
use crate::storage::{AnalysisStore, Database, MemoryAnalysisStore, StorageError};

/// Errors raised while assembling or stopping the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker unavailable: {0}")]
    Broker(#[from] BrokerError),

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM client error: {0}")]
    Llm(#[from] LlmError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Durable backends chosen by configuration.
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub broker: Arc<dyn QueueBroker>,
    pub results: Arc<dyn AnalysisStore>,
    pub inbox: Arc<dyn WebhookInbox>,
}

impl Backends {
    /// Everything in process; state is lost on exit.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryJobStore::new()),
            broker: Arc::new(MemoryBroker::new()),
            results: Arc::new(MemoryAnalysisStore::new()),
            inbox: Arc::new(MemoryInbox::new()),
        }
    }

    /// Connects to Redis and PostgreSQL where configured.
    pub async fn connect(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let mut backends = Self::in_memory();

        if let Some(url) = &config.redis_url {
            let broker = RedisBroker::connect(url).await?;
            let inbox: Arc<dyn WebhookInbox> =
                Arc::new(RedisInbox::new(broker.connection(), DEFAULT_PREFIX));
            let broker: Arc<dyn QueueBroker> = Arc::new(broker);
            backends.inbox = inbox;
            backends.broker = broker;
            info!("Using Redis broker");
        } else {
            info!("REDIS_URL not set, using in-process broker");
        }

        if let Some(url) = &config.database_url {
            let database = Database::connect(url).await?;
            let applied = database.run_migrations().await?;
            info!(applied, "Using PostgreSQL storage");
            let database = Arc::new(database);
            let store: Arc<dyn JobStore> = database.clone();
            let results: Arc<dyn AnalysisStore> = database;
            backends.store = store;
            backends.results = results;
        } else {
            info!("DATABASE_URL not set, using in-memory storage");
        }

        Ok(backends)
    }
}

/// Assembled collaborators of one service instance.
pub struct Service {
    pub config: ServiceConfig,
    pub queue: Arc<JobQueue>,
    pub results: Arc<dyn AnalysisStore>,
    pub inbox: Arc<dyn WebhookInbox>,
    pub context: Arc<ProcessorContext>,
}

impl Service {
    /// Connects configured backends and clones repositories with `git`.
    pub async fn connect(config: ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let backends = Backends::connect(&config).await?;
        let source = Arc::new(
            GitCliSource::new(config.workdir.clone()).with_clone_depth(config.clone_depth),
        );
        Self::assemble(config, backends, source)
    }

    /// Builds a service over explicit backends and source.
    pub fn assemble(
        config: ServiceConfig,
        backends: Backends,
        source: Arc<dyn SourceProvider>,
    ) -> Result<Self, ServiceError> {
        let queue = Arc::new(
            JobQueue::new(backends.store, backends.broker)
                .with_backoff(config.backoff())
                .with_default_max_attempts(config.max_attempts),
        );

        let analyzer = Arc::new(CommitAnalyzer::new(
            Arc::new(CodeParser::new()),
            Arc::new(ParsedCodeCache::default()),
            config.risk.clone(),
        ));
        let reviewer = Arc::new(build_reviewer(&config)?);
        let context = Arc::new(ProcessorContext::new(
            source,
            analyzer,
            reviewer,
            Arc::clone(&backends.results),
        ));

        Ok(Self {
            config,
            queue,
            results: backends.results,
            inbox: backends.inbox,
            context,
        })
    }

    /// Starts one pool per job type and the standard maintenance schedules.
    pub async fn start_workers(&self) -> Result<Workers, ServiceError> {
        let registry = handler_registry(Arc::clone(&self.context));
        let mut pools = PoolSet::new(
            Arc::clone(&self.queue),
            &registry,
            self.config.worker_pools(),
        )?;
        pools.start().await?;

        let health = Arc::new(
            HealthChecker::new()
                .with_probe(Arc::new(QueueProbe::new(Arc::clone(&self.queue))))
                .with_probe(Arc::new(PoolProbe::new(pools.readiness()))),
        );
        let mut schedules = standard_schedules(
            Arc::clone(&self.queue),
            Arc::clone(&self.inbox),
            Arc::clone(&health),
            MaintenanceIntervals::default(),
            self.config.retention(),
            self.config.lease_timeout(),
        )?;
        schedules.start()?;

        info!(
            commit_workers = self.config.commit_concurrency,
            repository_workers = self.config.repository_concurrency,
            docs_workers = self.config.docs_concurrency,
            "Workers started"
        );
        Ok(Workers {
            pools,
            schedules,
            health,
        })
    }

    /// Router state sharing this service's queue and stores.
    pub fn app_state(&self, health: Arc<HealthChecker>) -> AppState {
        AppState::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.results),
            Arc::clone(&self.inbox),
            health,
        )
    }
}

fn build_reviewer(config: &ServiceConfig) -> Result<CommitReviewer, ServiceError> {
    let Some(api_base) = &config.llm.api_base else {
        info!("LITELLM_API_BASE not set, reviews are heuristic only");
        return Ok(CommitReviewer::heuristic_only().with_thresholds(config.risk.clone()));
    };

    let client = LiteLlmClient::new(
        api_base.as_str(),
        config.llm.api_key.clone(),
        config.llm.model.as_str(),
    )?;
    let mut reviewer = CommitReviewer::new(
        Arc::new(client),
        ReviewConfig {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        },
    )
    .with_thresholds(config.risk.clone());
    if let Some(limiter) = RateLimiter::per_minute(config.llm.requests_per_minute) {
        reviewer = reviewer.with_rate_limiter(Arc::new(limiter));
    }

    info!(model = %config.llm.model, "LLM review enabled");
    Ok(reviewer)
}

/// Running pools and schedules.
pub struct Workers {
    pools: PoolSet,
    schedules: ScheduleManager,
    health: Arc<HealthChecker>,
}

impl Workers {
    pub fn health(&self) -> Arc<HealthChecker> {
        Arc::clone(&self.health)
    }

    pub fn is_ready(&self) -> bool {
        self.pools.is_ready()
    }

    /// Stops the schedules, then drains the pools.
    pub async fn shutdown(mut self) -> Result<(), ServiceError> {
        self.schedules.stop().await?;
        self.pools.shutdown().await?;
        info!("Workers stopped");
        Ok(())
    }
}
