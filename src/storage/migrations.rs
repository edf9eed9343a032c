//! Schema migrations.
//!
//! Steps from [`schema::MIGRATIONS`] are applied in version order and
//! recorded in `schema_migrations` with a SHA-256 checksum of their SQL. A
//! recorded step whose SQL has since changed is reported instead of silently
//! skipped. The whole run holds a transaction-scoped advisory lock so several
//! workers starting together apply each step exactly once.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use sqlx::{Executor, PgPool, Postgres, Transaction};
use thiserror::Error;

use super::schema::{self, Migration};

/// Advisory lock key shared by every process migrating this schema.
const MIGRATION_LOCK_KEY: i64 = 0x636f_6d6d_6974_6c6e;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {message}")]
    Failed {
        version: i64,
        name: String,
        message: String,
    },

    #[error("Migration {version} was applied with different SQL (recorded {recorded}, current {current})")]
    ChecksumMismatch {
        version: i64,
        recorded: String,
        current: String,
    },
}

/// A row of `schema_migrations`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

pub struct MigrationRunner {
    pool: PgPool,
    migrations: &'static [Migration],
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            migrations: schema::MIGRATIONS,
        }
    }

    /// Applies pending steps and returns how many ran.
    pub async fn run_migrations(&self) -> Result<usize, MigrationError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        ensure_table(&mut tx).await?;

        let recorded: HashMap<i64, String> =
            sqlx::query_as::<_, (i64, String)>("SELECT version, checksum FROM schema_migrations")
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let mut applied = 0;
        for migration in self.migrations {
            let current = checksum(migration.sql);
            match recorded.get(&migration.version) {
                Some(previous) if *previous == current => continue,
                Some(previous) => {
                    return Err(MigrationError::ChecksumMismatch {
                        version: migration.version,
                        recorded: previous.clone(),
                        current,
                    })
                }
                None => {
                    apply(&mut tx, migration, &current).await?;
                    applied += 1;
                }
            }
        }

        tx.commit().await?;
        if applied > 0 {
            tracing::info!(applied, "Applied database migrations");
        }
        Ok(applied)
    }

    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        let mut tx = self.pool.begin().await?;
        ensure_table(&mut tx).await?;
        let rows = sqlx::query_as::<_, AppliedMigration>(
            "SELECT version, name, checksum, applied_at FROM schema_migrations ORDER BY version",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(rows)
    }
}

async fn ensure_table(tx: &mut Transaction<'_, Postgres>) -> Result<(), MigrationError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn apply(
    tx: &mut Transaction<'_, Postgres>,
    migration: &Migration,
    checksum: &str,
) -> Result<(), MigrationError> {
    // A bare string has no arguments and goes over the simple query
    // protocol, which accepts the multi-statement index batch.
    (&mut **tx)
        .execute(migration.sql)
        .await
        .map_err(|e| MigrationError::Failed {
            version: migration.version,
            name: migration.name.to_string(),
            message: e.to_string(),
        })?;

    sqlx::query("INSERT INTO schema_migrations (version, name, checksum) VALUES ($1, $2, $3)")
        .bind(migration.version)
        .bind(migration.name)
        .bind(checksum)
        .execute(&mut **tx)
        .await?;

    tracing::debug!(version = migration.version, name = migration.name, "Applied migration");
    Ok(())
}

fn checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}
