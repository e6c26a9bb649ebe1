//! Job listing, lookup and structured search.

use std::collections::HashMap;
use std::sync::Arc;

use dci_core::embed::{flatten_with_prefix, group_embedded};
use dci_core::query::{Embed, JOB_COLUMNS, ListParams, ListQuery, parse_embed};
use dci_core::search::SearchQuery;
use dci_core::{Caller, Error, ResourceId, Result};
use dci_db::{
    CatalogRepo, ComponentRecord, FileRecord, FileRepo, JobFilter, JobRecord, JobRepo,
    JobStateRecord,
};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// A page of jobs plus the size of the filtered, unpaginated set.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Value>,
    pub count: i64,
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::Internal(format!("expected an object, got {}", other))),
        Err(e) => Err(Error::Internal(e.to_string())),
    }
}

/// Embedded entities fetched while rendering one response.
#[derive(Default)]
struct EmbedCache {
    entries: HashMap<(Embed, Uuid), Map<String, Value>>,
}

pub struct JobQueryService {
    catalog: Arc<dyn CatalogRepo>,
    jobs: Arc<dyn JobRepo>,
    files: Arc<dyn FileRepo>,
}

impl JobQueryService {
    pub fn new(
        catalog: Arc<dyn CatalogRepo>,
        jobs: Arc<dyn JobRepo>,
        files: Arc<dyn FileRepo>,
    ) -> Self {
        Self {
            catalog,
            jobs,
            files,
        }
    }

    async fn embedded(
        &self,
        cache: &mut EmbedCache,
        embed: Embed,
        job: &JobRecord,
    ) -> Result<Map<String, Value>> {
        let id = match embed {
            Embed::Team => job.team_id,
            Embed::Remoteci => job.remoteci_id,
            Embed::Jobdefinition => job.jobdefinition_id,
        };
        if let Some(entity) = cache.entries.get(&(embed, id)) {
            return Ok(entity.clone());
        }

        let entity = match embed {
            Embed::Team => to_object(&self.catalog.get_team(id.into()).await?)?,
            Embed::Remoteci => to_object(&self.catalog.get_remoteci(id.into()).await?)?,
            Embed::Jobdefinition => {
                to_object(&self.catalog.get_jobdefinition(id.into()).await?)?
            }
        };
        cache.entries.insert((embed, id), entity.clone());
        Ok(entity)
    }

    /// Render a job, inlining `embeds` as nested objects.
    async fn render(
        &self,
        cache: &mut EmbedCache,
        job: &JobRecord,
        embeds: &[Embed],
        with_configuration: bool,
    ) -> Result<Value> {
        let mut row = to_object(job)?;
        if !with_configuration {
            row.remove("configuration");
        }
        for embed in embeds {
            let entity = self.embedded(cache, *embed, job).await?;
            row.extend(flatten_with_prefix(embed.as_str(), &entity));
        }
        let names: Vec<&str> = embeds.iter().map(Embed::as_str).collect();
        Ok(Value::Object(group_embedded(&names, row)))
    }

    /// `GET /jobs`. Listings leave out `configuration`.
    pub async fn list(&self, caller: &Caller, query: &ListQuery) -> Result<JobPage> {
        let params = ListParams::parse(query, JOB_COLUMNS)?;
        let (records, count) = self
            .jobs
            .list(&JobFilter {
                team: caller.team_scope(),
                filters: params.filters,
                sort: params.sort,
                limit: params.limit,
                offset: params.offset,
            })
            .await?;

        let mut cache = EmbedCache::default();
        let mut jobs = Vec::with_capacity(records.len());
        for job in &records {
            jobs.push(self.render(&mut cache, job, &params.embed, false).await?);
        }
        Ok(JobPage { jobs, count })
    }

    /// `GET /jobs/<id>`. Returns the rendered job and its etag.
    pub async fn get(
        &self,
        caller: &Caller,
        id: ResourceId,
        embed: Option<&str>,
    ) -> Result<(Value, String)> {
        let embeds = parse_embed(embed)?;
        let job = self.visible(caller, id).await?;
        let rendered = self
            .render(&mut EmbedCache::default(), &job, &embeds, true)
            .await?;
        Ok((rendered, job.etag))
    }

    /// `POST /jobs/search`: top-level column filters plus configuration predicates.
    pub async fn search(&self, caller: &Caller, body: &Value) -> Result<JobPage> {
        let query = SearchQuery::from_json(body, JOB_COLUMNS)?;
        let (records, _) = self
            .jobs
            .list(&JobFilter {
                team: caller.team_scope(),
                filters: query.filters,
                ..Default::default()
            })
            .await?;

        let mut cache = EmbedCache::default();
        let mut jobs = Vec::new();
        for job in records
            .iter()
            .filter(|job| query.configuration.matches(&job.configuration))
        {
            jobs.push(self.render(&mut cache, job, &[], true).await?);
        }
        let count = jobs.len() as i64;
        Ok(JobPage { jobs, count })
    }

    /// A job the caller may read; others' jobs are reported missing.
    pub async fn visible(&self, caller: &Caller, id: ResourceId) -> Result<JobRecord> {
        Ok(self.jobs.get(id, caller.team_scope()).await?)
    }

    pub async fn components(&self, caller: &Caller, id: ResourceId) -> Result<Vec<ComponentRecord>> {
        self.visible(caller, id).await?;
        Ok(self.jobs.components(id).await?)
    }

    pub async fn jobstates(&self, caller: &Caller, id: ResourceId) -> Result<Vec<JobStateRecord>> {
        self.visible(caller, id).await?;
        Ok(self.jobs.jobstates(id).await?)
    }

    pub async fn files(&self, caller: &Caller, id: ResourceId) -> Result<Vec<FileRecord>> {
        self.visible(caller, id).await?;
        Ok(self.files.list_for_job(id).await?)
    }
}
