//! File metadata attached to jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dci_core::{Etag, ResourceId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::DbResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub mime: Option<String>,
    pub size: i64,
    pub job_id: uuid::Uuid,
    pub team_id: uuid::Uuid,
    /// Parsed test report summary, when the file was a recognized report.
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub mime: Option<String>,
    pub size: i64,
    pub job_id: ResourceId,
    pub team_id: ResourceId,
    pub result: Option<serde_json::Value>,
}

#[async_trait]
pub trait FileRepo: Send + Sync {
    async fn create(&self, file: NewFile) -> DbResult<FileRecord>;
    /// Files of a job, oldest first.
    async fn list_for_job(&self, job_id: ResourceId) -> DbResult<Vec<FileRecord>>;
}

/// PostgreSQL implementation of FileRepo.
pub struct PgFileRepo {
    pool: PgPool,
}

impl PgFileRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRepo for PgFileRepo {
    async fn create(&self, file: NewFile) -> DbResult<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO files (id, name, mime, size, job_id, team_id, result, created_at, updated_at, etag)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW(), $8)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(&file.name)
        .bind(&file.mime)
        .bind(file.size)
        .bind(file.job_id.as_uuid())
        .bind(file.team_id.as_uuid())
        .bind(&file.result)
        .bind(Etag::generate().into_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_for_job(&self, job_id: ResourceId) -> DbResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM files WHERE job_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(job_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
