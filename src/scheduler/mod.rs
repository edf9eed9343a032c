//! Durable multi-queue job scheduling.
//!
//! - **Job**: typed unit of work with a lifecycle and retry budget
//! - **JobStore**: source of truth for job records (memory or PostgreSQL)
//! - **QueueBroker**: visibility and ordering of job ids (memory or Redis)
//! - **JobQueue**: every state transition, retry backoff, pause/resume, stats
//! - **WorkerPool**: per-queue workers running registered handlers
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │ (API/CLI/    │
//!                      │  webhooks)   │
//!                      └──────┬───────┘
//!                             │ enqueue
//!                      ┌──────▼───────┐      ┌──────────┐
//!                      │   JobQueue   ├──────►  Store   │
//!                      └──────┬───────┘      └──────────┘
//!                             │ lease
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!  ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//!  │commit pool  │    │repository    │    │docs pool    │
//!  │(N workers)  │    │pool          │    │             │
//!  └─────────────┘    └──────────────┘    └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use commitlens::scheduler::{EnqueueRequest, HandlerRegistry, JobQueue, JobType, PoolSet, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let queue = Arc::new(JobQueue::in_memory());
//! let registry = HandlerRegistry::new().register(JobType::AnalyzeCommit, handler);
//! let mut pools = PoolSet::new(queue.clone(), &registry, vec![WorkerPoolConfig::new(JobType::AnalyzeCommit, 4)])?;
//! pools.start().await?;
//!
//! let id = queue.enqueue(EnqueueRequest::new(JobType::AnalyzeCommit, payload)).await?;
//! ```

pub mod broker;
pub mod job;
pub mod processor;
pub mod queue;
pub mod redis_broker;
pub mod store;
pub mod worker_pool;

pub use broker::{BrokerDepth, BrokerError, MemoryBroker, QueueBroker};
pub use job::{
    AnalyzeCommitPayload, AnalyzeRepositoryPayload, GenerateDocsPayload, Job, JobPayload,
    JobProgress, JobStatus, JobType,
};
pub use processor::{HandlerRegistry, JobHandler, ProgressReporter, ProgressUpdate};
pub use queue::{Backoff, EnqueueRequest, JobQueue, QueueError, QueueStats};
pub use redis_broker::RedisBroker;
pub use store::{JobStore, MemoryJobStore, Resolution, StatusCounts, StoreError};
pub use worker_pool::{PoolError, PoolSet, PoolStats, WorkerPool, WorkerPoolConfig};
