// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite registry backend for single-node deployments and tests.
//!
//! Schema and semantics mirror the PostgreSQL backend; IDs are stored as
//! hyphenated UUID text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::{DeploymentRecord, DeploymentStatus, ListQuery, Registry};
use crate::error::{CoreError, Result};

const SELECT_COLUMNS: &str = "id, owner_id, spec, status, failure_reason, tenants, \
     artifact_digest, replica_count, endpoints, backups, created_at, updated_at";

/// SQLite-backed [`Registry`].
#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

impl SqliteRegistry {
    /// Wrap an existing pool. Migrations are the caller's responsibility;
    /// see [`SqliteRegistry::migrate`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` (e.g. `sqlite:basin.db` or
    /// `sqlite::memory:`) and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Apply pending registry migrations to an externally managed pool.
    /// Safe to call repeatedly; applied migrations are skipped.
    pub async fn migrate(pool: &SqlitePool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(pool).await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(FromRow)]
struct DeploymentRow {
    id: String,
    owner_id: String,
    spec: String,
    status: String,
    failure_reason: Option<String>,
    tenants: String,
    artifact_digest: Option<String>,
    replica_count: i64,
    endpoints: String,
    backups: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeploymentRow {
    fn into_record(self) -> Result<DeploymentRecord> {
        let id = Uuid::parse_str(&self.id).map_err(|e| CoreError::StorageError {
            operation: "decode".to_string(),
            details: format!("invalid deployment id '{}': {}", self.id, e),
        })?;
        let status =
            DeploymentStatus::parse(&self.status).ok_or_else(|| CoreError::StorageError {
                operation: "decode".to_string(),
                details: format!("unknown deployment status '{}'", self.status),
            })?;
        Ok(DeploymentRecord {
            id,
            owner_id: self.owner_id,
            spec: serde_json::from_str(&self.spec)?,
            status,
            failure_reason: self.failure_reason,
            tenants: serde_json::from_str(&self.tenants)?,
            artifact_digest: self.artifact_digest,
            replica_count: self.replica_count,
            endpoints: serde_json::from_str(&self.endpoints)?,
            backups: serde_json::from_str(&self.backups)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn create(&self, record: DeploymentRecord) -> Result<()> {
        if self
            .find_by_name(&record.owner_id, record.name())
            .await?
            .is_some()
        {
            return Err(CoreError::DeploymentAlreadyExists {
                name: record.name().to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO deployments
                (id, owner_id, name, spec, status, failure_reason, tenants,
                 artifact_digest, replica_count, endpoints, backups, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.owner_id)
        .bind(record.name())
        .bind(serde_json::to_string(&record.spec)?)
        .bind(record.status.as_str())
        .bind(&record.failure_reason)
        .bind(serde_json::to_string(&record.tenants)?)
        .bind(&record.artifact_digest)
        .bind(record.replica_count)
        .bind(serde_json::to_string(&record.endpoints)?)
        .bind(serde_json::to_string(&record.backups)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeploymentRecord>> {
        let row = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {} FROM deployments WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeploymentRow::into_record).transpose()
    }

    async fn find_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<DeploymentRecord>> {
        let row = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {} FROM deployments \
             WHERE owner_id = $1 AND name = $2 AND status != 'DELETED'",
            SELECT_COLUMNS
        ))
        .bind(owner_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeploymentRow::into_record).transpose()
    }

    async fn update(&self, mut record: DeploymentRecord) -> Result<()> {
        record.touch();
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET spec = $2, status = $3, failure_reason = $4, tenants = $5,
                artifact_digest = $6, replica_count = $7, endpoints = $8,
                backups = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(record.id.to_string())
        .bind(serde_json::to_string(&record.spec)?)
        .bind(record.status.as_str())
        .bind(&record.failure_reason)
        .bind(serde_json::to_string(&record.tenants)?)
        .bind(&record.artifact_digest)
        .bind(record.replica_count)
        .bind(serde_json::to_string(&record.endpoints)?)
        .bind(serde_json::to_string(&record.backups)?)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::DeploymentNotFound {
                deployment_id: record.id,
            });
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM deployments WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: ListQuery<'_>) -> Result<Vec<DeploymentRecord>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(&format!(
            "SELECT {} FROM deployments \
             WHERE ($1 IS NULL OR owner_id = $1) \
               AND ($2 IS NULL OR status = $2) \
             ORDER BY created_at ASC \
             LIMIT $3 OFFSET $4",
            SELECT_COLUMNS
        ))
        .bind(query.owner_id)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.limit.max(0))
        .bind(query.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeploymentRow::into_record).collect()
    }

    async fn count_active(&self, owner_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM deployments \
             WHERE owner_id = $1 AND status NOT IN ('DELETED', 'FAILED')",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
