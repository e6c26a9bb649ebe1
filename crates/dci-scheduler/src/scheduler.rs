//! Job allocation: schedule, recheck and direct creation.

use std::sync::Arc;

use dci_core::{AgentMetadata, Caller, Error, ResourceId, Result};
use dci_db::{CatalogRepo, ComponentRecord, JobDefinitionRecord, JobRecord, JobRepo, NewJob};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::eligibility::EligibilityChecker;
use crate::resolver::ComponentResolver;

/// A request from a remoteci for its next job.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub remoteci_id: ResourceId,
    pub topic_id: ResourceId,
    pub agent: AgentMetadata,
}

/// Explicit bindings for a job created without scheduling.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    pub jobdefinition_id: ResourceId,
    pub team_id: ResourceId,
    pub remoteci_id: ResourceId,
    #[serde(default)]
    pub components: Vec<ResourceId>,
    pub comment: Option<String>,
}

/// A freshly created job with its component snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedJob {
    #[serde(flatten)]
    pub job: JobRecord,
    pub components: Vec<ComponentRecord>,
}

pub struct JobScheduler {
    catalog: Arc<dyn CatalogRepo>,
    jobs: Arc<dyn JobRepo>,
    eligibility: EligibilityChecker,
    resolver: ComponentResolver,
}

impl JobScheduler {
    pub fn new(catalog: Arc<dyn CatalogRepo>, jobs: Arc<dyn JobRepo>) -> Self {
        Self {
            eligibility: EligibilityChecker::new(catalog.clone()),
            resolver: ComponentResolver::new(catalog.clone()),
            catalog,
            jobs,
        }
    }

    /// Resolve components, reporting an unresolvable snapshot as "no job available".
    async fn resolve(&self, jobdefinition: &JobDefinitionRecord) -> Result<Vec<ComponentRecord>> {
        match self.resolver.resolve(jobdefinition).await {
            Err(Error::NotFound(reason)) => Err(Error::PreconditionFailed(reason)),
            other => other,
        }
    }

    /// Allocate a new job to a remoteci.
    ///
    /// Every live job of the remoteci is killed in the same atomic unit as
    /// the creation.
    pub async fn schedule(&self, caller: &Caller, request: ScheduleRequest) -> Result<CreatedJob> {
        let eligibility = match self
            .eligibility
            .check(caller, request.remoteci_id, request.topic_id)
            .await
        {
            Ok(eligibility) => eligibility,
            Err(e) => {
                warn!(
                    remoteci_id = %request.remoteci_id,
                    topic_id = %request.topic_id,
                    error = %e,
                    "schedule refused"
                );
                return Err(e);
            }
        };

        let components = self.resolve(&eligibility.jobdefinition).await.inspect_err(|e| {
            warn!(
                remoteci_id = %request.remoteci_id,
                jobdefinition_id = %eligibility.jobdefinition.id,
                error = %e,
                "schedule refused"
            );
        })?;

        let scheduled = self
            .jobs
            .create_superseding(NewJob {
                jobdefinition_id: eligibility.jobdefinition.id.into(),
                team_id: eligibility.remoteci.team_id.into(),
                remoteci_id: request.remoteci_id,
                comment: None,
                recheck: false,
                agent: request.agent,
                component_ids: components.iter().map(|c| c.id.into()).collect(),
            })
            .await?;

        info!(
            job_id = %scheduled.job.id,
            remoteci_id = %request.remoteci_id,
            jobdefinition_id = %eligibility.jobdefinition.id,
            components = components.len(),
            superseded = scheduled.superseded.len(),
            "job scheduled"
        );
        Ok(CreatedJob {
            job: scheduled.job,
            components,
        })
    }

    /// Run a job's bindings again as a new job.
    ///
    /// The job definition, team and remoteci are copied; components are
    /// resolved again; comment and configuration start empty. Counts as a
    /// schedule event for the remoteci.
    pub async fn recheck(&self, caller: &Caller, job_id: ResourceId) -> Result<CreatedJob> {
        let original = self.jobs.get(job_id, caller.team_scope()).await?;
        let jobdefinition = self
            .catalog
            .get_jobdefinition(original.jobdefinition_id.into())
            .await?;
        let components = self.resolve(&jobdefinition).await?;

        let scheduled = self
            .jobs
            .create_superseding(NewJob {
                jobdefinition_id: original.jobdefinition_id.into(),
                team_id: original.team_id.into(),
                remoteci_id: original.remoteci_id.into(),
                comment: None,
                recheck: true,
                agent: AgentMetadata::default(),
                component_ids: components.iter().map(|c| c.id.into()).collect(),
            })
            .await?;

        info!(
            job_id = %scheduled.job.id,
            rechecked_job_id = %original.id,
            superseded = scheduled.superseded.len(),
            "job rechecked"
        );
        Ok(CreatedJob {
            job: scheduled.job,
            components,
        })
    }

    /// Create a job from explicit bindings. Does not supersede.
    pub async fn create(&self, caller: &Caller, request: CreateRequest) -> Result<CreatedJob> {
        caller.ensure_team(*request.team_id.as_uuid())?;

        self.catalog.get_jobdefinition(request.jobdefinition_id).await?;
        let remoteci = self.catalog.get_remoteci(request.remoteci_id).await?;
        if remoteci.team_id != *request.team_id.as_uuid() {
            return Err(Error::bad_request(format!(
                "remoteci {} does not belong to team {}",
                request.remoteci_id, request.team_id
            )));
        }

        let components = self.catalog.get_components(&request.components).await?;
        if let Some(missing) = request
            .components
            .iter()
            .find(|id| !components.iter().any(|c| c.id == *id.as_uuid()))
        {
            return Err(Error::NotFound(format!("component {}", missing)));
        }

        let job = self
            .jobs
            .create(NewJob {
                jobdefinition_id: request.jobdefinition_id,
                team_id: request.team_id,
                remoteci_id: request.remoteci_id,
                comment: request.comment,
                recheck: false,
                agent: AgentMetadata::default(),
                component_ids: request.components,
            })
            .await?;

        info!(job_id = %job.id, remoteci_id = %job.remoteci_id, "job created");
        Ok(CreatedJob { job, components })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use dci_core::JobStatus;
    use dci_db::JobFilter;

    async fn live_jobs(f: &Fixture) -> Vec<JobRecord> {
        let (jobs, _) = f.jobs().list(&JobFilter::default()).await.unwrap();
        jobs.into_iter()
            .filter(|j| !JobStatus::parse(&j.status).unwrap().is_terminal())
            .collect()
    }

    #[tokio::test]
    async fn test_schedule_creates_job_with_snapshot() {
        let f = Fixture::with_components();
        let created = f
            .scheduler()
            .schedule(&f.user, f.schedule_request())
            .await
            .unwrap();

        assert_eq!(created.job.status, "new");
        assert!(!created.job.recheck);
        assert_eq!(created.job.team_id, f.team.id);
        assert_eq!(created.job.jobdefinition_id, f.jobdefinition.id);
        assert_eq!(created.job.user_agent.as_deref(), Some("python-dciclient"));
        assert_eq!(
            created.job.client_version.as_deref(),
            Some("python-dciclient_0.1.0")
        );
        assert_eq!(created.components.len(), 2);

        let states = f.jobs().jobstates(created.job.id.into()).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, "new");
    }

    #[tokio::test]
    async fn test_schedule_without_components_is_precondition_failure() {
        let f = Fixture::new();
        f.store.add_component(f.topic.id, "type_1", "lonely");

        let err = f
            .scheduler()
            .schedule(&f.user, f.schedule_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_schedule_without_jobdefinition_is_precondition_failure() {
        let f = Fixture::with_components();
        f.store.set_jobdefinition_active(f.jobdefinition.id, false);

        let err = f
            .scheduler()
            .schedule(&f.user, f.schedule_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_schedule_supersedes_live_jobs() {
        let f = Fixture::with_components();
        let scheduler = f.scheduler();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let created = scheduler.schedule(&f.user, f.schedule_request()).await.unwrap();
            ids.push(created.job.id);
        }

        let live = live_jobs(&f).await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, ids[2]);

        for id in &ids[..2] {
            let job = f.jobs().get((*id).into(), None).await.unwrap();
            assert_eq!(job.status, "killed");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_schedules_leave_one_live_job() {
        let f = Fixture::with_components();
        let scheduler = Arc::new(f.scheduler());

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let scheduler = scheduler.clone();
                let caller = f.user.clone();
                let request = f.schedule_request();
                tokio::spawn(async move { scheduler.schedule(&caller, request).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let (jobs, total) = f.jobs().list(&JobFilter::default()).await.unwrap();
        assert_eq!(total, 50);
        assert_eq!(live_jobs(&f).await.len(), 1);
        let killed = jobs.iter().filter(|j| j.status == "killed").count();
        assert_eq!(killed, 49);
    }

    #[tokio::test]
    async fn test_supersession_leaves_terminal_jobs_alone() {
        let f = Fixture::with_components();
        let scheduler = f.scheduler();
        let first = scheduler.schedule(&f.user, f.schedule_request()).await.unwrap();
        f.jobs()
            .update(
                first.job.id.into(),
                &first.job.etag.clone().into(),
                dci_db::JobUpdate {
                    status: Some(JobStatus::Success),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        scheduler.schedule(&f.user, f.schedule_request()).await.unwrap();
        let first = f.jobs().get(first.job.id.into(), None).await.unwrap();
        assert_eq!(first.status, "success");
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen() {
        let f = Fixture::with_components();
        let created = f
            .scheduler()
            .schedule(&f.user, f.schedule_request())
            .await
            .unwrap();
        let before = f.jobs().components(created.job.id.into()).await.unwrap();

        f.store.add_component(f.topic.id, "type_1", "type_1-2.0");
        let after = f.jobs().components(created.job.id.into()).await.unwrap();

        let ids = |cs: &[ComponentRecord]| cs.iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids(&before), ids(&after));
    }

    #[tokio::test]
    async fn test_schedule_recheck_schedule() {
        let f = Fixture::with_components();
        let scheduler = f.scheduler();

        let a = scheduler.schedule(&f.user, f.schedule_request()).await.unwrap();
        let b = scheduler.recheck(&f.user, a.job.id.into()).await.unwrap();
        assert!(b.job.recheck);
        assert_eq!(b.job.remoteci_id, a.job.remoteci_id);
        assert_eq!(b.job.jobdefinition_id, a.job.jobdefinition_id);

        let a_now = f.jobs().get(a.job.id.into(), None).await.unwrap();
        assert_eq!(a_now.status, "killed");

        let c = scheduler.schedule(&f.user, f.schedule_request()).await.unwrap();
        let b_now = f.jobs().get(b.job.id.into(), None).await.unwrap();
        assert_eq!(b_now.status, "killed");

        let live = live_jobs(&f).await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, c.job.id);
    }

    #[tokio::test]
    async fn test_recheck_resets_configuration_and_resolves_latest() {
        let f = Fixture::with_components();
        let scheduler = f.scheduler();
        let a = scheduler.schedule(&f.user, f.schedule_request()).await.unwrap();
        f.jobs()
            .update(
                a.job.id.into(),
                &a.job.etag.clone().into(),
                dci_db::JobUpdate {
                    comment: Some("flaky".into()),
                    configuration: Some(serde_json::json!({"ha": "enabled"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let newer = f.store.add_component(f.topic.id, "type_1", "type_1-2.0");

        let b = scheduler.recheck(&f.user, a.job.id.into()).await.unwrap();
        assert_eq!(b.job.configuration, serde_json::json!({}));
        assert_eq!(b.job.comment, None);
        assert!(b.components.iter().any(|c| c.id == newer.id));
    }

    #[tokio::test]
    async fn test_recheck_of_invisible_job_is_not_found() {
        let f = Fixture::with_components();
        let a = f
            .scheduler()
            .schedule(&f.user, f.schedule_request())
            .await
            .unwrap();
        let err = f
            .scheduler()
            .recheck(&f.stranger, a.job.id.into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_with_explicit_bindings() {
        let f = Fixture::new();
        let component = f.store.add_component(f.topic.id, "type_1", "pinned");

        let request = CreateRequest {
            jobdefinition_id: f.jobdefinition.id.into(),
            team_id: f.team.id.into(),
            remoteci_id: f.remoteci.id.into(),
            components: vec![component.id.into()],
            comment: Some("manual".into()),
        };
        let created = f.scheduler().create(&f.user, request.clone()).await.unwrap();
        assert_eq!(created.job.comment.as_deref(), Some("manual"));
        assert_eq!(created.components.len(), 1);

        // Direct creation does not supersede.
        f.scheduler().create(&f.user, request.clone()).await.unwrap();
        assert_eq!(live_jobs(&f).await.len(), 2);

        let err = f.scheduler().create(&f.stranger, request).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_create_with_unknown_component_is_not_found() {
        let f = Fixture::new();
        let request = CreateRequest {
            jobdefinition_id: f.jobdefinition.id.into(),
            team_id: f.team.id.into(),
            remoteci_id: f.remoteci.id.into(),
            components: vec![ResourceId::new()],
            comment: None,
        };
        let err = f.scheduler().create(&f.user, request).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
