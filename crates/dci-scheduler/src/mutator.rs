//! Conditional job mutation.
//!
//! Every write is keyed on (id, etag). A write that matches zero rows is a
//! conflict whether the etag was stale or the job is gone.

use std::sync::Arc;

use dci_core::{Caller, Error, Etag, JobStatus, ResourceId, Result};
use dci_db::{JobRecord, JobRepo, JobStateRecord, JobUpdate};
use serde::Deserialize;
use tracing::{info, warn};

/// Fields accepted by `PUT /jobs/<id>`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub comment: Option<String>,
    pub configuration: Option<serde_json::Value>,
}

/// A status report from an agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateReport {
    pub status: JobStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReportedState {
    pub job: JobRecord,
    pub jobstate: Option<JobStateRecord>,
}

fn require_etag(etag: Option<Etag>) -> Result<Etag> {
    etag.ok_or_else(|| Error::PreconditionFailed("'If-match' header must be provided".to_string()))
}

fn current_status(job: &JobRecord) -> Result<JobStatus> {
    JobStatus::parse(&job.status)
        .ok_or_else(|| Error::Internal(format!("job {} has unknown status '{}'", job.id, job.status)))
}

fn conflict_logged(job_id: ResourceId, err: Error) -> Error {
    if matches!(err, Error::Conflict(_)) {
        warn!(job_id = %job_id, "conditional write lost");
    }
    err
}

pub struct JobMutator {
    jobs: Arc<dyn JobRepo>,
}

impl JobMutator {
    pub fn new(jobs: Arc<dyn JobRepo>) -> Self {
        Self { jobs }
    }

    /// Load a job the caller intends to write. A job of another team is
    /// reported as unauthorized rather than hidden.
    async fn load_for_write(&self, caller: &Caller, id: ResourceId) -> Result<JobRecord> {
        let job = self.jobs.get(id, None).await?;
        caller.ensure_team(job.team_id)?;
        Ok(job)
    }

    /// Load a job for an `If-Match` guarded write. A job that is already gone
    /// is a lost race, reported like a stale etag.
    async fn load_for_conditional_write(
        &self,
        caller: &Caller,
        id: ResourceId,
    ) -> Result<JobRecord> {
        match self.load_for_write(caller, id).await {
            Err(Error::NotFound(_)) => Err(conflict_logged(
                id,
                Error::Conflict(format!("job {} was modified or deleted", id)),
            )),
            other => other,
        }
    }

    /// Update status, comment and configuration under an `If-Match` precondition.
    pub async fn update(
        &self,
        caller: &Caller,
        id: ResourceId,
        etag: Option<Etag>,
        patch: JobPatch,
    ) -> Result<JobRecord> {
        let etag = require_etag(etag)?;
        let job = self.load_for_conditional_write(caller, id).await?;

        if let Some(configuration) = &patch.configuration {
            if !configuration.is_object() {
                return Err(Error::bad_request_with(
                    "Invalid configuration",
                    serde_json::json!({ "error": "configuration must be a JSON object" }),
                ));
            }
        }

        let current = current_status(&job)?;
        let status = match patch.status {
            Some(next) if next != current => {
                current.check_reported_transition(next)?;
                Some(next)
            }
            _ => None,
        };

        let updated = self
            .jobs
            .update(
                id,
                &etag,
                JobUpdate {
                    status,
                    comment: patch.comment,
                    configuration: patch.configuration,
                    state_comment: None,
                },
            )
            .await
            .map_err(|e| conflict_logged(id, e.into()))?;

        info!(job_id = %id, status = %updated.status, "job updated");
        Ok(updated)
    }

    /// Delete under an `If-Match` precondition.
    pub async fn delete(&self, caller: &Caller, id: ResourceId, etag: Option<Etag>) -> Result<()> {
        let etag = require_etag(etag)?;
        self.load_for_conditional_write(caller, id).await?;
        self.jobs
            .delete(id, &etag)
            .await
            .map_err(|e| conflict_logged(id, e.into()))?;
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    /// Record a status reported by the agent running the job.
    ///
    /// No `If-Match` is needed: the write is conditioned on the etag read
    /// here, so a concurrent change still surfaces as a conflict.
    pub async fn report_state(
        &self,
        caller: &Caller,
        id: ResourceId,
        report: StateReport,
    ) -> Result<ReportedState> {
        let job = self.load_for_write(caller, id).await?;
        current_status(&job)?.check_reported_transition(report.status)?;

        let updated = self
            .jobs
            .update(
                id,
                &Etag::from(job.etag),
                JobUpdate {
                    status: Some(report.status),
                    state_comment: report.comment,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| conflict_logged(id, e.into()))?;
        let jobstate = self.jobs.jobstates(id).await?.pop();

        info!(job_id = %id, status = %report.status, "job state reported");
        Ok(ReportedState {
            job: updated,
            jobstate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use serde_json::json;

    async fn scheduled(f: &Fixture) -> JobRecord {
        f.scheduler()
            .schedule(&f.user, f.schedule_request())
            .await
            .unwrap()
            .job
    }

    fn etag(job: &JobRecord) -> Option<Etag> {
        Some(Etag::from(job.etag.clone()))
    }

    #[tokio::test]
    async fn test_update_succeeds_once_per_etag() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let mutator = f.mutator();

        let patch = JobPatch {
            comment: Some("first".into()),
            ..Default::default()
        };
        let updated = mutator
            .update(&f.user, job.id.into(), etag(&job), patch.clone())
            .await
            .unwrap();
        assert_eq!(updated.comment.as_deref(), Some("first"));
        assert_ne!(updated.etag, job.etag);

        let err = mutator
            .update(&f.user, job.id.into(), etag(&job), patch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_without_etag_is_precondition_failure() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let err = f
            .mutator()
            .update(&f.user, job.id.into(), None, JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(msg) if msg == "'If-match' header must be provided"));
    }

    #[tokio::test]
    async fn test_status_change_appends_jobstate() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let mutator = f.mutator();

        let running = mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&job),
                JobPatch {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        // Same status again: no new transition.
        mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&running),
                JobPatch {
                    status: Some(JobStatus::Running),
                    comment: Some("still going".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let states = f.jobs().jobstates(job.id.into()).await.unwrap();
        let statuses: Vec<&str> = states.iter().map(|s| s.status.as_str()).collect();
        assert_eq!(statuses, vec!["new", "running"]);
    }

    #[tokio::test]
    async fn test_terminal_job_rejects_status_change() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let mutator = f.mutator();
        let done = mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&job),
                JobPatch {
                    status: Some(JobStatus::Failure),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&done),
                JobPatch {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Non-status fields stay editable.
        mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&done),
                JobPatch {
                    comment: Some("known issue".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_configuration_must_be_an_object() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let err = f
            .mutator()
            .update(
                &f.user,
                job.id.into(),
                etag(&job),
                JobPatch {
                    configuration: Some(json!(["a"])),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_foreign_writes_are_unauthorized() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let err = f
            .mutator()
            .delete(&f.stranger, job.id.into(), etag(&job))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        f.mutator()
            .delete(&f.super_admin, job.id.into(), etag(&job))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_with_stale_etag_conflicts() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let mutator = f.mutator();
        mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&job),
                JobPatch {
                    comment: Some("bump".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = mutator
            .delete(&f.user, job.id.into(), etag(&job))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_null_comment_leaves_comment_unchanged() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let mutator = f.mutator();

        let commented = mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&job),
                JobPatch {
                    comment: Some("flaky network".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let patch: JobPatch = serde_json::from_value(json!({ "comment": null })).unwrap();
        let unchanged = mutator
            .update(&f.user, job.id.into(), etag(&commented), patch)
            .await
            .unwrap();
        assert_eq!(unchanged.comment.as_deref(), Some("flaky network"));

        let emptied = mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&unchanged),
                JobPatch {
                    comment: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(emptied.comment.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_writes_after_delete_conflict() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let mutator = f.mutator();
        mutator
            .delete(&f.user, job.id.into(), etag(&job))
            .await
            .unwrap();

        let err = mutator
            .update(
                &f.user,
                job.id.into(),
                etag(&job),
                JobPatch {
                    comment: Some("too late".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let err = mutator
            .delete(&f.user, job.id.into(), etag(&job))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_report_state() {
        let f = Fixture::with_components();
        let job = scheduled(&f).await;
        let mutator = f.mutator();

        let reported = mutator
            .report_state(
                &f.user,
                job.id.into(),
                StateReport {
                    status: JobStatus::PreRun,
                    comment: Some("installing".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(reported.job.status, "pre-run");
        let jobstate = reported.jobstate.unwrap();
        assert_eq!(jobstate.status, "pre-run");
        assert_eq!(jobstate.comment.as_deref(), Some("installing"));

        let err = mutator
            .report_state(
                &f.user,
                job.id.into(),
                StateReport {
                    status: JobStatus::Killed,
                    comment: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
