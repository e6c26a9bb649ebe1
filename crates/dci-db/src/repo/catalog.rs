//! Read access to the resources jobs are built from.
//!
//! Teams, topics, job definitions, components and remotecis are managed by
//! their own CRUD endpoints; the engine only reads them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dci_core::ResourceId;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopicRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobDefinitionRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub topic_id: uuid::Uuid,
    pub active: bool,
    /// Component types a job of this definition is built from.
    pub component_types: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ComponentRecord {
    pub id: uuid::Uuid,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub component_type: String,
    pub topic_id: uuid::Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RemoteciRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub team_id: uuid::Uuid,
    pub active: bool,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub etag: String,
}

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn get_team(&self, id: ResourceId) -> DbResult<TeamRecord>;
    async fn get_topic(&self, id: ResourceId) -> DbResult<TopicRecord>;
    async fn topic_has_team(&self, topic_id: ResourceId, team_id: ResourceId) -> DbResult<bool>;
    async fn get_remoteci(&self, id: ResourceId) -> DbResult<RemoteciRecord>;
    async fn get_jobdefinition(&self, id: ResourceId) -> DbResult<JobDefinitionRecord>;

    /// Active job definitions of a topic, oldest first.
    async fn list_active_jobdefinitions(
        &self,
        topic_id: ResourceId,
    ) -> DbResult<Vec<JobDefinitionRecord>>;

    /// Active components of a topic whose type is in `types`, in insertion order.
    async fn list_active_components(
        &self,
        topic_id: ResourceId,
        types: &[String],
    ) -> DbResult<Vec<ComponentRecord>>;

    /// Components by id. Unknown ids are skipped.
    async fn get_components(&self, ids: &[ResourceId]) -> DbResult<Vec<ComponentRecord>>;

    async fn ping(&self) -> DbResult<()>;
}

/// PostgreSQL implementation of CatalogRepo.
pub struct PgCatalogRepo {
    pool: PgPool,
}

impl PgCatalogRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepo for PgCatalogRepo {
    async fn get_team(&self, id: ResourceId) -> DbResult<TeamRecord> {
        let record = sqlx::query_as::<_, TeamRecord>("SELECT * FROM teams WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("team {}", id)))?;
        Ok(record)
    }

    async fn get_topic(&self, id: ResourceId) -> DbResult<TopicRecord> {
        let record = sqlx::query_as::<_, TopicRecord>("SELECT * FROM topics WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("topic {}", id)))?;
        Ok(record)
    }

    async fn topic_has_team(&self, topic_id: ResourceId, team_id: ResourceId) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM topics_teams WHERE topic_id = $1 AND team_id = $2)",
        )
        .bind(topic_id.as_uuid())
        .bind(team_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn get_remoteci(&self, id: ResourceId) -> DbResult<RemoteciRecord> {
        let record = sqlx::query_as::<_, RemoteciRecord>("SELECT * FROM remotecis WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("remoteci {}", id)))?;
        Ok(record)
    }

    async fn get_jobdefinition(&self, id: ResourceId) -> DbResult<JobDefinitionRecord> {
        let record =
            sqlx::query_as::<_, JobDefinitionRecord>("SELECT * FROM jobdefinitions WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("jobdefinition {}", id)))?;
        Ok(record)
    }

    async fn list_active_jobdefinitions(
        &self,
        topic_id: ResourceId,
    ) -> DbResult<Vec<JobDefinitionRecord>> {
        let records = sqlx::query_as::<_, JobDefinitionRecord>(
            r#"
            SELECT * FROM jobdefinitions
            WHERE topic_id = $1 AND active
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(topic_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_active_components(
        &self,
        topic_id: ResourceId,
        types: &[String],
    ) -> DbResult<Vec<ComponentRecord>> {
        let records = sqlx::query_as::<_, ComponentRecord>(
            r#"
            SELECT * FROM components
            WHERE topic_id = $1 AND active AND type = ANY($2)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(topic_id.as_uuid())
        .bind(types)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn get_components(&self, ids: &[ResourceId]) -> DbResult<Vec<ComponentRecord>> {
        let ids: Vec<uuid::Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let records = sqlx::query_as::<_, ComponentRecord>(
            "SELECT * FROM components WHERE id = ANY($1) ORDER BY created_at ASC, id ASC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
