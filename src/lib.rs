//! commitlens: commit, repository and documentation analysis over durable job queues.
//!
//! Work arrives as jobs (HTTP, CLI or push webhooks), is scheduled onto one
//! queue per job type, and is processed by fixed-size worker pools running the
//! analysis engine. Results land in an analysis store.

// Core modules
pub mod analysis;
pub mod error;
pub mod scheduler;
pub mod source;

// Collaborators
pub mod llm;
pub mod storage;

// Job handlers and upkeep
pub mod maintenance;
pub mod processors;

// Outer surface
pub mod api;
pub mod cli;
pub mod config;
pub mod metrics;
pub mod service;
pub mod utils;

// Re-export commonly used error types
pub use config::{ConfigError, ServiceConfig};
pub use error::{JobError, LlmError, SourceError};
pub use service::{Service, ServiceError};
