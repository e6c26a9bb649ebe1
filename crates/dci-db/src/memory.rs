//! In-memory implementation of every repository trait.
//!
//! All state sits behind one mutex, so each trait method is atomic. Used by
//! engine and HTTP tests, and for running the server without PostgreSQL.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dci_core::query::{SortKey, WhereFilter};
use dci_core::{Etag, JobStatus, ResourceId, Role};
use uuid::Uuid;

use crate::repo::job::parse_timestamp;
use crate::repo::{
    CatalogRepo, ComponentRecord, FileRecord, FileRepo, JobDefinitionRecord, JobFilter, JobRecord,
    JobRepo, JobStateRecord, JobUpdate, NewFile, NewJob, RemoteciRecord, ScheduledJob, TeamRecord,
    TopicRecord, UserRecord, UserRepo, hash_token,
};
use crate::{DbError, DbResult};

#[derive(Default)]
struct State {
    teams: Vec<TeamRecord>,
    users: Vec<UserRecord>,
    topics: Vec<TopicRecord>,
    topics_teams: HashSet<(Uuid, Uuid)>,
    jobdefinitions: Vec<JobDefinitionRecord>,
    components: Vec<ComponentRecord>,
    remotecis: Vec<RemoteciRecord>,
    jobs: Vec<JobRecord>,
    jobs_components: HashMap<Uuid, Vec<Uuid>>,
    jobstates: Vec<JobStateRecord>,
    files: Vec<FileRecord>,
    clock: Option<DateTime<Utc>>,
}

impl State {
    /// Strictly increasing timestamps, so creation order is total.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn push_jobstate(&mut self, job_id: Uuid, team_id: Uuid, status: JobStatus, comment: Option<String>) {
        let created_at = self.tick();
        self.jobstates.push(JobStateRecord {
            id: Uuid::now_v7(),
            job_id,
            team_id,
            status: status.as_str().to_string(),
            comment,
            created_at,
        });
    }

    fn insert_job(&mut self, job: NewJob) -> JobRecord {
        let now = self.tick();
        let record = JobRecord {
            id: Uuid::now_v7(),
            jobdefinition_id: *job.jobdefinition_id.as_uuid(),
            team_id: *job.team_id.as_uuid(),
            remoteci_id: *job.remoteci_id.as_uuid(),
            status: JobStatus::New.as_str().to_string(),
            comment: job.comment,
            configuration: serde_json::json!({}),
            recheck: job.recheck,
            user_agent: job.agent.user_agent,
            client_version: job.agent.client_version,
            created_at: now,
            updated_at: now,
            etag: Etag::generate().into_string(),
        };

        let mut component_ids: Vec<Uuid> = Vec::new();
        for id in job.component_ids {
            if !component_ids.contains(id.as_uuid()) {
                component_ids.push(*id.as_uuid());
            }
        }
        self.jobs_components.insert(record.id, component_ids);
        self.jobs.push(record.clone());
        self.push_jobstate(record.id, record.team_id, JobStatus::New, None);
        record
    }

    fn sorted_components(&self, ids: &[Uuid]) -> Vec<ComponentRecord> {
        let mut components: Vec<ComponentRecord> = self
            .components
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect();
        components.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        components
    }
}

/// A column value, ordered the way PostgreSQL orders it (`NULL` last).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Cell {
    Bool(bool),
    Text(String),
    Time(DateTime<Utc>),
    Null,
}

impl Cell {
    /// Equality against a `where` value, following the SQL backend.
    fn matches(&self, value: &str) -> bool {
        match self {
            Cell::Bool(b) => b.to_string() == value,
            Cell::Text(s) => s == value,
            Cell::Time(t) => parse_timestamp(value).is_some_and(|v| v == *t),
            Cell::Null => false,
        }
    }
}

fn job_cell(job: &JobRecord, column: &str) -> Cell {
    let opt = |v: &Option<String>| v.clone().map(Cell::Text).unwrap_or(Cell::Null);
    match column {
        "id" => Cell::Text(job.id.to_string()),
        "status" => Cell::Text(job.status.clone()),
        "comment" => opt(&job.comment),
        "recheck" => Cell::Bool(job.recheck),
        "jobdefinition_id" => Cell::Text(job.jobdefinition_id.to_string()),
        "team_id" => Cell::Text(job.team_id.to_string()),
        "remoteci_id" => Cell::Text(job.remoteci_id.to_string()),
        "user_agent" => opt(&job.user_agent),
        "client_version" => opt(&job.client_version),
        "created_at" => Cell::Time(job.created_at),
        "updated_at" => Cell::Time(job.updated_at),
        "etag" => Cell::Text(job.etag.clone()),
        _ => Cell::Null,
    }
}

fn matches_filter(job: &JobRecord, filter: &JobFilter) -> bool {
    if filter.team.is_some_and(|team| team != job.team_id) {
        return false;
    }
    filter
        .filters
        .iter()
        .all(|WhereFilter { column, value }| {
            job_cell(job, column).matches(value)
        })
}

fn compare_jobs(a: &JobRecord, b: &JobRecord, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ord = job_cell(a, key.column).cmp(&job_cell(b, key.column));
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}

/// In-memory store implementing [`CatalogRepo`], [`JobRepo`], [`FileRepo`] and [`UserRepo`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_team(&self, name: &str) -> TeamRecord {
        let mut state = self.lock();
        let now = state.tick();
        let team = TeamRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            etag: Etag::generate().into_string(),
        };
        state.teams.push(team.clone());
        team
    }

    /// Register a user whose bearer token is `token`.
    pub fn add_user(&self, name: &str, team_id: Uuid, role: Role, token: &str) -> UserRecord {
        let mut state = self.lock();
        let now = state.tick();
        let user = UserRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            team_id,
            role: role.as_str().to_string(),
            api_token_sha256: hash_token(token),
            created_at: now,
            updated_at: now,
            etag: Etag::generate().into_string(),
        };
        state.users.push(user.clone());
        user
    }

    pub fn add_topic(&self, name: &str) -> TopicRecord {
        let mut state = self.lock();
        let now = state.tick();
        let topic = TopicRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            etag: Etag::generate().into_string(),
        };
        state.topics.push(topic.clone());
        topic
    }

    pub fn add_team_to_topic(&self, topic_id: Uuid, team_id: Uuid) {
        self.lock().topics_teams.insert((topic_id, team_id));
    }

    pub fn add_jobdefinition(
        &self,
        topic_id: Uuid,
        name: &str,
        component_types: &[&str],
    ) -> JobDefinitionRecord {
        let mut state = self.lock();
        let now = state.tick();
        let jobdefinition = JobDefinitionRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            topic_id,
            active: true,
            component_types: component_types.iter().map(|t| t.to_string()).collect(),
            created_at: now,
            updated_at: now,
            etag: Etag::generate().into_string(),
        };
        state.jobdefinitions.push(jobdefinition.clone());
        jobdefinition
    }

    pub fn set_jobdefinition_active(&self, id: Uuid, active: bool) {
        let mut state = self.lock();
        if let Some(jd) = state.jobdefinitions.iter_mut().find(|jd| jd.id == id) {
            jd.active = active;
        }
    }

    pub fn add_component(&self, topic_id: Uuid, component_type: &str, name: &str) -> ComponentRecord {
        let now = self.lock().tick();
        self.add_component_at(topic_id, component_type, name, now)
    }

    /// Add a component with an explicit creation time.
    pub fn add_component_at(
        &self,
        topic_id: Uuid,
        component_type: &str,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> ComponentRecord {
        let component = ComponentRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            component_type: component_type.to_string(),
            topic_id,
            active: true,
            created_at,
            updated_at: created_at,
            etag: Etag::generate().into_string(),
        };
        self.lock().components.push(component.clone());
        component
    }

    pub fn set_component_active(&self, id: Uuid, active: bool) {
        let mut state = self.lock();
        if let Some(c) = state.components.iter_mut().find(|c| c.id == id) {
            c.active = active;
        }
    }

    pub fn add_remoteci(&self, team_id: Uuid, name: &str) -> RemoteciRecord {
        let mut state = self.lock();
        let now = state.tick();
        let remoteci = RemoteciRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            team_id,
            active: true,
            data: serde_json::json!({}),
            created_at: now,
            updated_at: now,
            etag: Etag::generate().into_string(),
        };
        state.remotecis.push(remoteci.clone());
        remoteci
    }

    pub fn set_remoteci_active(&self, id: Uuid, active: bool) {
        let mut state = self.lock();
        if let Some(r) = state.remotecis.iter_mut().find(|r| r.id == id) {
            r.active = active;
        }
    }
}

#[async_trait]
impl CatalogRepo for MemoryStore {
    async fn get_team(&self, id: ResourceId) -> DbResult<TeamRecord> {
        self.lock()
            .teams
            .iter()
            .find(|t| t.id == *id.as_uuid())
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("team {}", id)))
    }

    async fn get_topic(&self, id: ResourceId) -> DbResult<TopicRecord> {
        self.lock()
            .topics
            .iter()
            .find(|t| t.id == *id.as_uuid())
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("topic {}", id)))
    }

    async fn topic_has_team(&self, topic_id: ResourceId, team_id: ResourceId) -> DbResult<bool> {
        Ok(self
            .lock()
            .topics_teams
            .contains(&(*topic_id.as_uuid(), *team_id.as_uuid())))
    }

    async fn get_remoteci(&self, id: ResourceId) -> DbResult<RemoteciRecord> {
        self.lock()
            .remotecis
            .iter()
            .find(|r| r.id == *id.as_uuid())
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("remoteci {}", id)))
    }

    async fn get_jobdefinition(&self, id: ResourceId) -> DbResult<JobDefinitionRecord> {
        self.lock()
            .jobdefinitions
            .iter()
            .find(|jd| jd.id == *id.as_uuid())
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("jobdefinition {}", id)))
    }

    async fn list_active_jobdefinitions(
        &self,
        topic_id: ResourceId,
    ) -> DbResult<Vec<JobDefinitionRecord>> {
        let mut records: Vec<JobDefinitionRecord> = self
            .lock()
            .jobdefinitions
            .iter()
            .filter(|jd| jd.topic_id == *topic_id.as_uuid() && jd.active)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn list_active_components(
        &self,
        topic_id: ResourceId,
        types: &[String],
    ) -> DbResult<Vec<ComponentRecord>> {
        let mut records: Vec<ComponentRecord> = self
            .lock()
            .components
            .iter()
            .filter(|c| {
                c.topic_id == *topic_id.as_uuid() && c.active && types.contains(&c.component_type)
            })
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order.
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn get_components(&self, ids: &[ResourceId]) -> DbResult<Vec<ComponentRecord>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        Ok(self.lock().sorted_components(&ids))
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
}

#[async_trait]
impl JobRepo for MemoryStore {
    async fn create(&self, job: NewJob) -> DbResult<JobRecord> {
        Ok(self.lock().insert_job(job))
    }

    async fn create_superseding(&self, job: NewJob) -> DbResult<ScheduledJob> {
        let mut state = self.lock();
        let remoteci_id = *job.remoteci_id.as_uuid();
        if !state.remotecis.iter().any(|r| r.id == remoteci_id) {
            return Err(DbError::NotFound(format!("remoteci {}", remoteci_id)));
        }

        let live = JobStatus::live_strs();
        let now = state.tick();
        let mut superseded = Vec::new();
        for existing in state
            .jobs
            .iter_mut()
            .filter(|j| j.remoteci_id == remoteci_id && live.contains(&j.status))
        {
            existing.status = JobStatus::Killed.as_str().to_string();
            existing.etag = Etag::generate().into_string();
            existing.updated_at = now;
            superseded.push((existing.id, existing.team_id));
        }
        for (job_id, team_id) in &superseded {
            state.push_jobstate(*job_id, *team_id, JobStatus::Killed, None);
        }

        let record = state.insert_job(job);
        Ok(ScheduledJob {
            job: record,
            superseded: superseded.into_iter().map(|(id, _)| id).collect(),
        })
    }

    async fn get(&self, id: ResourceId, team: Option<Uuid>) -> DbResult<JobRecord> {
        self.lock()
            .jobs
            .iter()
            .find(|j| j.id == *id.as_uuid() && team.is_none_or(|t| t == j.team_id))
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))
    }

    async fn list(&self, filter: &JobFilter) -> DbResult<(Vec<JobRecord>, i64)> {
        let mut jobs: Vec<JobRecord> = self
            .lock()
            .jobs
            .iter()
            .filter(|j| matches_filter(j, filter))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| compare_jobs(a, b, &filter.sort));

        let total = jobs.len() as i64;
        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let page: Vec<JobRecord> = match filter.limit {
            Some(limit) => jobs
                .into_iter()
                .skip(offset)
                .take(usize::try_from(limit).unwrap_or(0))
                .collect(),
            None => jobs.into_iter().skip(offset).collect(),
        };
        Ok((page, total))
    }

    async fn update(&self, id: ResourceId, etag: &Etag, update: JobUpdate) -> DbResult<JobRecord> {
        let mut state = self.lock();
        let now = state.tick();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == *id.as_uuid() && j.etag == etag.as_str())
            .ok_or_else(|| DbError::Conflict(format!("job {} was modified or deleted", id)))?;

        if let Some(status) = update.status {
            job.status = status.as_str().to_string();
        }
        if let Some(comment) = update.comment {
            job.comment = Some(comment);
        }
        if let Some(configuration) = update.configuration {
            job.configuration = configuration;
        }
        job.etag = Etag::generate().into_string();
        job.updated_at = now;
        let record = job.clone();

        if let Some(status) = update.status {
            state.push_jobstate(record.id, record.team_id, status, update.state_comment);
        }
        Ok(record)
    }

    async fn delete(&self, id: ResourceId, etag: &Etag) -> DbResult<()> {
        let mut state = self.lock();
        let job_id = *id.as_uuid();
        let Some(index) = state
            .jobs
            .iter()
            .position(|j| j.id == job_id && j.etag == etag.as_str())
        else {
            return Err(DbError::Conflict(format!(
                "job {} was modified or deleted",
                id
            )));
        };

        state.jobs.remove(index);
        state.jobs_components.remove(&job_id);
        state.jobstates.retain(|s| s.job_id != job_id);
        state.files.retain(|f| f.job_id != job_id);
        Ok(())
    }

    async fn components(&self, id: ResourceId) -> DbResult<Vec<ComponentRecord>> {
        let state = self.lock();
        let ids = state
            .jobs_components
            .get(id.as_uuid())
            .cloned()
            .unwrap_or_default();
        Ok(state.sorted_components(&ids))
    }

    async fn jobstates(&self, id: ResourceId) -> DbResult<Vec<JobStateRecord>> {
        Ok(self
            .lock()
            .jobstates
            .iter()
            .filter(|s| s.job_id == *id.as_uuid())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FileRepo for MemoryStore {
    async fn create(&self, file: NewFile) -> DbResult<FileRecord> {
        let mut state = self.lock();
        if !state.jobs.iter().any(|j| j.id == *file.job_id.as_uuid()) {
            return Err(DbError::NotFound(format!("job {}", file.job_id)));
        }
        let now = state.tick();
        let record = FileRecord {
            id: Uuid::now_v7(),
            name: file.name,
            mime: file.mime,
            size: file.size,
            job_id: *file.job_id.as_uuid(),
            team_id: *file.team_id.as_uuid(),
            result: file.result,
            created_at: now,
            updated_at: now,
            etag: Etag::generate().into_string(),
        };
        state.files.push(record.clone());
        Ok(record)
    }

    async fn list_for_job(&self, job_id: ResourceId) -> DbResult<Vec<FileRecord>> {
        Ok(self
            .lock()
            .files
            .iter()
            .filter(|f| f.job_id == *job_id.as_uuid())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn find_by_token_hash(&self, token_sha256: &str) -> DbResult<Option<UserRecord>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.api_token_sha256 == token_sha256)
            .cloned())
    }
}
