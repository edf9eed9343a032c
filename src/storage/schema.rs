//! PostgreSQL schema.

/// Job records; `status` and `job_type` hold the snake-case enum names.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    job_type VARCHAR(64) NOT NULL,
    payload JSONB NOT NULL,
    status VARCHAR(32) NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    error TEXT,
    result JSONB,
    progress JSONB,
    CHECK (attempts <= max_attempts)
)
"#;

pub const CREATE_ANALYSIS_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS analysis_results (
    id UUID PRIMARY KEY,
    job_id UUID NOT NULL,
    kind VARCHAR(32) NOT NULL,
    repository TEXT NOT NULL,
    revision TEXT NOT NULL,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (kind, repository, revision)
)
"#;

pub const CREATE_REPOSITORY_ROLLUPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS repository_rollups (
    repository TEXT PRIMARY KEY,
    branch TEXT,
    data JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_type_status ON jobs(job_type, status, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_started_at ON jobs(started_at) WHERE status = 'processing';
CREATE INDEX IF NOT EXISTS idx_jobs_completed_at ON jobs(completed_at);
CREATE INDEX IF NOT EXISTS idx_analysis_results_repository ON analysis_results(repository, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_analysis_results_job_id ON analysis_results(job_id)
"#;

/// One versioned schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Migrations in application order. Versions are never reused or edited
/// once released; append new steps instead.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_jobs",
        sql: CREATE_JOBS_TABLE,
    },
    Migration {
        version: 2,
        name: "create_analysis_results",
        sql: CREATE_ANALYSIS_RESULTS_TABLE,
    },
    Migration {
        version: 3,
        name: "create_repository_rollups",
        sql: CREATE_REPOSITORY_ROLLUPS_TABLE,
    },
    Migration {
        version: 4,
        name: "create_indexes",
        sql: CREATE_INDEXES,
    },
];

pub mod tables {
    pub const JOBS: &str = "jobs";
    pub const ANALYSIS_RESULTS: &str = "analysis_results";
    pub const REPOSITORY_ROLLUPS: &str = "repository_rollups";
    pub const SCHEMA_MIGRATIONS: &str = "schema_migrations";
}
