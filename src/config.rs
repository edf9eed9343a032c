//! Service configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! YAML file, and environment variables. The result is validated once before
//! anything is started.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::RiskThresholds;
use crate::llm::DEFAULT_MODEL;
use crate::scheduler::{Backoff, JobType, WorkerPoolConfig};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable or file entry has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Language-model collaborator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// LiteLLM-compatible base URL; reviews are heuristic-only without it.
    pub api_base: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// Per-model request budget; 0 disables limiting.
    pub requests_per_minute: u32,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            requests_per_minute: 60,
            temperature: 0.2,
            max_tokens: 1200,
        }
    }
}

/// Configuration for the whole service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    // Infrastructure
    /// Redis broker; the in-process broker is used when absent.
    pub redis_url: Option<String>,
    /// PostgreSQL store; in-memory stores are used when absent.
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    pub http_addr: String,
    /// Root for checkout directories; the system temp dir when absent.
    pub workdir: Option<PathBuf>,
    pub clone_depth: u32,

    // Worker pools
    pub commit_concurrency: usize,
    pub repository_concurrency: usize,
    pub docs_concurrency: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_secs: u64,

    // Retry and retention
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub retention_hours: u64,

    pub llm: LlmSettings,
    pub risk: RiskThresholds,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            database_url: None,
            http_addr: "0.0.0.0:8080".to_string(),
            workdir: None,
            clone_depth: 50,

            commit_concurrency: 4,
            repository_concurrency: 1,
            docs_concurrency: 2,
            poll_interval_ms: 1000,
            job_timeout_secs: 600,

            max_attempts: 3,
            backoff_base_ms: 2000,
            retention_hours: 168,

            llm: LlmSettings::default(),
            risk: RiskThresholds::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the environment.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Redis broker URL (default: in-process broker)
    /// - `DATABASE_URL`: PostgreSQL URL (default: in-memory stores)
    /// - `LITELLM_API_BASE` / `LITELLM_API_KEY` / `LITELLM_DEFAULT_MODEL`: review model
    /// - `COMMITLENS_LLM_REQUESTS_PER_MINUTE`: request budget per model (default: 60)
    /// - `COMMITLENS_COMMIT_CONCURRENCY`: commit workers (default: 4)
    /// - `COMMITLENS_REPOSITORY_CONCURRENCY`: repository workers (default: 1)
    /// - `COMMITLENS_DOCS_CONCURRENCY`: documentation workers (default: 2)
    /// - `COMMITLENS_MAX_ATTEMPTS`: attempts per job (default: 3)
    /// - `COMMITLENS_BACKOFF_BASE_MS`: first retry delay (default: 2000)
    /// - `COMMITLENS_JOB_TIMEOUT_SECS`: handler deadline (default: 600)
    /// - `COMMITLENS_POLL_INTERVAL_MS`: idle worker poll interval (default: 1000)
    /// - `COMMITLENS_RETENTION_HOURS`: finished job retention (default: 168)
    /// - `COMMITLENS_HTTP_ADDR`: API listen address (default: 0.0.0.0:8080)
    /// - `COMMITLENS_WORKDIR`: checkout root (default: system temp dir)
    /// - `COMMITLENS_CLONE_DEPTH`: shallow clone depth (default: 50)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Defaults, then the YAML file at `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML file; absent keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Overrides fields from variables returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(val) = var("REDIS_URL") {
            self.redis_url = Some(val);
        }
        if let Some(val) = var("DATABASE_URL") {
            self.database_url = Some(val);
        }
        if let Some(val) = var("COMMITLENS_HTTP_ADDR") {
            self.http_addr = val;
        }
        if let Some(val) = var("COMMITLENS_WORKDIR") {
            self.workdir = Some(PathBuf::from(val));
        }
        if let Some(val) = var("COMMITLENS_CLONE_DEPTH") {
            self.clone_depth = parse_env_value(&val, "COMMITLENS_CLONE_DEPTH")?;
        }

        // Worker pools
        if let Some(val) = var("COMMITLENS_COMMIT_CONCURRENCY") {
            self.commit_concurrency = parse_env_value(&val, "COMMITLENS_COMMIT_CONCURRENCY")?;
        }
        if let Some(val) = var("COMMITLENS_REPOSITORY_CONCURRENCY") {
            self.repository_concurrency =
                parse_env_value(&val, "COMMITLENS_REPOSITORY_CONCURRENCY")?;
        }
        if let Some(val) = var("COMMITLENS_DOCS_CONCURRENCY") {
            self.docs_concurrency = parse_env_value(&val, "COMMITLENS_DOCS_CONCURRENCY")?;
        }
        if let Some(val) = var("COMMITLENS_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env_value(&val, "COMMITLENS_POLL_INTERVAL_MS")?;
        }
        if let Some(val) = var("COMMITLENS_JOB_TIMEOUT_SECS") {
            self.job_timeout_secs = parse_env_value(&val, "COMMITLENS_JOB_TIMEOUT_SECS")?;
        }

        // Retry and retention
        if let Some(val) = var("COMMITLENS_MAX_ATTEMPTS") {
            self.max_attempts = parse_env_value(&val, "COMMITLENS_MAX_ATTEMPTS")?;
        }
        if let Some(val) = var("COMMITLENS_BACKOFF_BASE_MS") {
            self.backoff_base_ms = parse_env_value(&val, "COMMITLENS_BACKOFF_BASE_MS")?;
        }
        if let Some(val) = var("COMMITLENS_RETENTION_HOURS") {
            self.retention_hours = parse_env_value(&val, "COMMITLENS_RETENTION_HOURS")?;
        }

        // LLM
        if let Some(val) = var("LITELLM_API_BASE") {
            self.llm.api_base = Some(val);
        }
        if let Some(val) = var("LITELLM_API_KEY") {
            self.llm.api_key = Some(val);
        }
        if let Some(val) = var("LITELLM_DEFAULT_MODEL") {
            self.llm.model = val;
        }
        if let Some(val) = var("COMMITLENS_LLM_REQUESTS_PER_MINUTE") {
            self.llm.requests_per_minute =
                parse_env_value(&val, "COMMITLENS_LLM_REQUESTS_PER_MINUTE")?;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, workers) in [
            ("commit_concurrency", self.commit_concurrency),
            ("repository_concurrency", self.repository_concurrency),
            ("docs_concurrency", self.docs_concurrency),
        ] {
            if workers == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.job_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "job_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.clone_depth == 0 {
            return Err(ConfigError::ValidationFailed(
                "clone_depth must be greater than 0".to_string(),
            ));
        }

        self.http_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "http_addr".to_string(),
                message: e.to_string(),
            })?;

        if self.llm.api_base.is_some() && self.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "llm.model cannot be empty when an API base is set".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationFailed(
                "llm.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        let risk = &self.risk;
        if risk.medium_complexity > risk.high_complexity
            || risk.medium_ratio > risk.high_ratio
            || risk.medium_files > risk.high_files
            || risk.medium_lines > risk.high_lines
        {
            return Err(ConfigError::ValidationFailed(
                "risk thresholds: every medium bound must not exceed its high bound".to_string(),
            ));
        }

        Ok(())
    }

    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                key: "http_addr".to_string(),
                message: e.to_string(),
            })
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Age after which a `Processing` job is treated as abandoned.
    pub fn lease_timeout(&self) -> Duration {
        self.job_timeout().saturating_mul(2)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(Duration::from_millis(self.backoff_base_ms))
    }

    pub fn concurrency(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::AnalyzeCommit => self.commit_concurrency,
            JobType::AnalyzeRepository => self.repository_concurrency,
            JobType::GenerateDocs => self.docs_concurrency,
        }
    }

    /// One pool config per job type.
    pub fn worker_pools(&self) -> Vec<WorkerPoolConfig> {
        JobType::ALL
            .into_iter()
            .map(|job_type| {
                WorkerPoolConfig::new(job_type, self.concurrency(job_type))
                    .with_poll_interval(self.poll_interval())
                    .with_job_timeout(self.job_timeout())
            })
            .collect()
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }
}

/// Parses an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.commit_concurrency, 4);
        assert_eq!(config.repository_concurrency, 1);
        assert_eq!(config.docs_concurrency, 2);
        assert_eq!(config.backoff().base, Duration::from_millis(2000));
        assert_eq!(config.lease_timeout(), Duration::from_secs(1200));
        assert_eq!(config.retention(), Duration::from_secs(168 * 3600));
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(env(&[
                ("REDIS_URL", "redis://cache:6379"),
                ("COMMITLENS_COMMIT_CONCURRENCY", "8"),
                ("COMMITLENS_BACKOFF_BASE_MS", "500"),
                ("LITELLM_API_BASE", "http://llm:4000"),
                ("LITELLM_DEFAULT_MODEL", "claude-sonnet"),
                ("DATABASE_URL", "  "),
            ]))
            .expect("apply");

        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.commit_concurrency, 8);
        assert_eq!(config.backoff_base_ms, 500);
        assert_eq!(config.llm.api_base.as_deref(), Some("http://llm:4000"));
        assert_eq!(config.llm.model, "claude-sonnet");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_env(env(&[("COMMITLENS_MAX_ATTEMPTS", "three")]))
            .expect_err("not a number");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "COMMITLENS_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_zero_values_fail_validation() {
        let config = ServiceConfig {
            docs_concurrency: 0,
            ..ServiceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        let config = ServiceConfig {
            max_attempts: 0,
            ..ServiceConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        let config = ServiceConfig::default().with_http_addr("not-an-address");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_yaml_overlay_keeps_defaults() {
        let config = ServiceConfig::from_yaml(
            "docs_concurrency: 5\nllm:\n  requests_per_minute: 10\nrisk:\n  high_files: 20\n",
        )
        .expect("yaml");
        assert_eq!(config.docs_concurrency, 5);
        assert_eq!(config.commit_concurrency, 4);
        assert_eq!(config.llm.requests_per_minute, 10);
        assert_eq!(config.llm.model, DEFAULT_MODEL);
        assert_eq!(config.risk.high_files, 20);
        assert_eq!(config.risk.medium_files, 5);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("commitlens.yaml");
        std::fs::write(&path, "max_attempts: 7\n").expect("write");

        let config = ServiceConfig::from_file(&path).expect("load");
        assert_eq!(config.max_attempts, 7);
        assert!(ServiceConfig::from_file(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_worker_pools_per_type() {
        let config = ServiceConfig {
            job_timeout_secs: 30,
            ..ServiceConfig::default()
        };
        let pools = config.worker_pools();
        assert_eq!(pools.len(), 3);
        assert_eq!(pools[0].job_type, JobType::AnalyzeCommit);
        assert_eq!(pools[0].num_workers, 4);
        assert_eq!(pools[1].num_workers, 1);
        assert_eq!(pools[2].lease_timeout, Duration::from_secs(60));
    }
}
