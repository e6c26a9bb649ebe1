//! Job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dci_core::query::{SortKey, WhereFilter};
use dci_core::{AgentMetadata, Etag, JobStatus, ResourceId};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::repo::catalog::ComponentRecord;
use crate::{DbError, DbResult};

/// A job record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: uuid::Uuid,
    pub jobdefinition_id: uuid::Uuid,
    pub team_id: uuid::Uuid,
    pub remoteci_id: uuid::Uuid,
    pub status: String,
    pub comment: Option<String>,
    pub configuration: serde_json::Value,
    pub recheck: bool,
    pub user_agent: Option<String>,
    pub client_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub etag: String,
}

/// An entry of a job's status transition log.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobStateRecord {
    pub id: uuid::Uuid,
    pub job_id: uuid::Uuid,
    pub team_id: uuid::Uuid,
    pub status: String,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub jobdefinition_id: ResourceId,
    pub team_id: ResourceId,
    pub remoteci_id: ResourceId,
    pub comment: Option<String>,
    pub recheck: bool,
    pub agent: AgentMetadata,
    /// Snapshot of the components this job tests.
    pub component_ids: Vec<ResourceId>,
}

/// Fields a conditional update may change.
///
/// A `Some` status appends a jobstate entry carrying `state_comment`.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub comment: Option<String>,
    pub configuration: Option<serde_json::Value>,
    pub state_comment: Option<String>,
}

/// Listing filter. `team` restricts to one team's jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub team: Option<uuid::Uuid>,
    pub filters: Vec<WhereFilter>,
    pub sort: Vec<SortKey>,
    pub limit: Option<i64>,
    pub offset: i64,
}

/// Result of a superseding create.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub job: JobRecord,
    /// Jobs of the same remoteci moved to `killed`.
    pub superseded: Vec<uuid::Uuid>,
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert a job with its component snapshot and an initial `new` jobstate.
    async fn create(&self, job: NewJob) -> DbResult<JobRecord>;

    /// Like `create`, but kills every live job of the same remoteci in the
    /// same atomic unit.
    async fn create_superseding(&self, job: NewJob) -> DbResult<ScheduledJob>;

    async fn get(&self, id: ResourceId, team: Option<uuid::Uuid>) -> DbResult<JobRecord>;

    /// A page of jobs and the total count of the filtered set.
    async fn list(&self, filter: &JobFilter) -> DbResult<(Vec<JobRecord>, i64)>;

    /// Apply `update` if the stored etag still equals `etag`.
    async fn update(&self, id: ResourceId, etag: &Etag, update: JobUpdate) -> DbResult<JobRecord>;

    /// Delete if the stored etag still equals `etag`.
    async fn delete(&self, id: ResourceId, etag: &Etag) -> DbResult<()>;

    async fn components(&self, id: ResourceId) -> DbResult<Vec<ComponentRecord>>;

    async fn jobstates(&self, id: ResourceId) -> DbResult<Vec<JobStateRecord>>;
}

/// PostgreSQL implementation of JobRepo.
pub struct PgJobRepo {
    pool: PgPool,
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_job(conn: &mut PgConnection, job: &NewJob) -> DbResult<JobRecord> {
    let record = sqlx::query_as::<_, JobRecord>(
        r#"
        INSERT INTO jobs (id, jobdefinition_id, team_id, remoteci_id, status, comment,
                          recheck, user_agent, client_version, created_at, updated_at, etag)
        VALUES ($1, $2, $3, $4, 'new', $5, $6, $7, $8, NOW(), NOW(), $9)
        RETURNING *
        "#,
    )
    .bind(uuid::Uuid::now_v7())
    .bind(job.jobdefinition_id.as_uuid())
    .bind(job.team_id.as_uuid())
    .bind(job.remoteci_id.as_uuid())
    .bind(&job.comment)
    .bind(job.recheck)
    .bind(&job.agent.user_agent)
    .bind(&job.agent.client_version)
    .bind(Etag::generate().into_string())
    .fetch_one(&mut *conn)
    .await?;

    let component_ids: Vec<uuid::Uuid> = job.component_ids.iter().map(|c| *c.as_uuid()).collect();
    sqlx::query(
        "INSERT INTO jobs_components (job_id, component_id) SELECT $1, unnest($2::uuid[]) ON CONFLICT DO NOTHING",
    )
    .bind(record.id)
    .bind(&component_ids)
    .execute(&mut *conn)
    .await?;

    insert_jobstate(conn, record.id, record.team_id, JobStatus::New, None).await?;
    Ok(record)
}

async fn insert_jobstate(
    conn: &mut PgConnection,
    job_id: uuid::Uuid,
    team_id: uuid::Uuid,
    status: JobStatus,
    comment: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO jobstates (id, job_id, team_id, status, comment, created_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        "#,
    )
    .bind(uuid::Uuid::now_v7())
    .bind(job_id)
    .bind(team_id)
    .bind(status.as_str())
    .bind(comment)
    .execute(conn)
    .await?;
    Ok(())
}

const TIMESTAMP_COLUMNS: &[&str] = &["created_at", "updated_at"];

pub(crate) fn is_timestamp_column(column: &str) -> bool {
    TIMESTAMP_COLUMNS.contains(&column)
}

/// Parse a `where` value for a timestamp column. Timestamps match by instant,
/// so any RFC 3339 rendering of the stored value selects it.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn push_conditions(qb: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
    qb.push(" WHERE TRUE");
    if let Some(team) = filter.team {
        qb.push(" AND team_id = ").push_bind(team);
    }
    // Columns come from a static allow-list.
    for WhereFilter { column, value } in &filter.filters {
        if is_timestamp_column(column) {
            match parse_timestamp(value) {
                Some(instant) => {
                    qb.push(format!(" AND {} = ", column)).push_bind(instant);
                }
                None => {
                    qb.push(" AND FALSE");
                }
            }
        } else {
            qb.push(format!(" AND {}::text = ", column))
                .push_bind(value.clone());
        }
    }
}

#[async_trait]
impl JobRepo for PgJobRepo {
    async fn create(&self, job: NewJob) -> DbResult<JobRecord> {
        let mut tx = self.pool.begin().await?;
        let record = insert_job(&mut tx, &job).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn create_superseding(&self, job: NewJob) -> DbResult<ScheduledJob> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent schedules of the same remoteci.
        sqlx::query("SELECT id FROM remotecis WHERE id = $1 FOR UPDATE")
            .bind(job.remoteci_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("remoteci {}", job.remoteci_id)))?;

        let superseded: Vec<(uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'killed', etag = md5(gen_random_uuid()::text), updated_at = NOW()
            WHERE remoteci_id = $1 AND status = ANY($2)
            RETURNING id, team_id
            "#,
        )
        .bind(job.remoteci_id.as_uuid())
        .bind(JobStatus::live_strs())
        .fetch_all(&mut *tx)
        .await?;

        for (job_id, team_id) in &superseded {
            insert_jobstate(&mut tx, *job_id, *team_id, JobStatus::Killed, None).await?;
        }

        let record = insert_job(&mut tx, &job).await?;
        tx.commit().await?;

        debug!(
            job_id = %record.id,
            superseded = superseded.len(),
            "inserted superseding job"
        );
        Ok(ScheduledJob {
            job: record,
            superseded: superseded.into_iter().map(|(id, _)| id).collect(),
        })
    }

    async fn get(&self, id: ResourceId, team: Option<uuid::Uuid>) -> DbResult<JobRecord> {
        let record = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE id = $1 AND ($2::uuid IS NULL OR team_id = $2)",
        )
        .bind(id.as_uuid())
        .bind(team)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        Ok(record)
    }

    async fn list(&self, filter: &JobFilter) -> DbResult<(Vec<JobRecord>, i64)> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        push_conditions(&mut count_query, filter);
        let total = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM jobs");
        push_conditions(&mut query, filter);
        query.push(" ORDER BY ");
        for SortKey { column, descending } in &filter.sort {
            query.push(format!(
                "{} {}, ",
                column,
                if *descending { "DESC" } else { "ASC" }
            ));
        }
        query.push("created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit);
        }
        query.push(" OFFSET ").push_bind(filter.offset);

        let records = query
            .build_query_as::<JobRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok((records, total))
    }

    async fn update(&self, id: ResourceId, etag: &Etag, update: JobUpdate) -> DbResult<JobRecord> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE jobs
            SET status = COALESCE($3, status),
                comment = COALESCE($4, comment),
                configuration = COALESCE($5, configuration),
                etag = $6,
                updated_at = NOW()
            WHERE id = $1 AND etag = $2
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(etag.as_str())
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.comment)
        .bind(&update.configuration)
        .bind(Etag::generate().into_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::Conflict(format!("job {} was modified or deleted", id)))?;

        if let Some(status) = update.status {
            insert_jobstate(
                &mut tx,
                record.id,
                record.team_id,
                status,
                update.state_comment.as_deref(),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn delete(&self, id: ResourceId, etag: &Etag) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1 AND etag = $2")
            .bind(id.as_uuid())
            .bind(etag.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::Conflict(format!(
                "job {} was modified or deleted",
                id
            )));
        }
        Ok(())
    }

    async fn components(&self, id: ResourceId) -> DbResult<Vec<ComponentRecord>> {
        let records = sqlx::query_as::<_, ComponentRecord>(
            r#"
            SELECT c.* FROM components c
            JOIN jobs_components jc ON jc.component_id = c.id
            WHERE jc.job_id = $1
            ORDER BY c.created_at ASC, c.id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn jobstates(&self, id: ResourceId) -> DbResult<Vec<JobStateRecord>> {
        let records = sqlx::query_as::<_, JobStateRecord>(
            "SELECT * FROM jobstates WHERE job_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
