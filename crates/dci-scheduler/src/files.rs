//! Files attached to jobs and the test results parsed from them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dci_core::junit::{JunitSummary, is_junit, parse_junit};
use dci_core::{Caller, Error, ResourceId, Result};
use dci_db::{FileRecord, FileRepo, JobRepo, NewFile};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// An uploaded file as received from the agent.
#[derive(Debug, Clone)]
pub struct FileUpload<'a> {
    pub name: Option<String>,
    pub mime: Option<String>,
    pub content: &'a [u8],
}

/// A parsed test result of one file.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub file_id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: JunitSummary,
}

pub struct FileService {
    jobs: Arc<dyn JobRepo>,
    files: Arc<dyn FileRepo>,
}

impl FileService {
    pub fn new(jobs: Arc<dyn JobRepo>, files: Arc<dyn FileRepo>) -> Self {
        Self { jobs, files }
    }

    /// Record a file against a job. Recognized JUnit reports get a result summary.
    pub async fn attach(
        &self,
        caller: &Caller,
        job_id: ResourceId,
        upload: FileUpload<'_>,
    ) -> Result<FileRecord> {
        let name = upload
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| {
                Error::bad_request_with(
                    "Invalid file name",
                    serde_json::json!({ "error": "the DCI-NAME header is required" }),
                )
            })?;

        let job = self.jobs.get(job_id, None).await?;
        caller.ensure_team(job.team_id)?;

        let result = if is_junit(&name, upload.mime.as_deref()) {
            match parse_junit(upload.content) {
                Ok(summary) => serde_json::to_value(summary).ok(),
                Err(e) => {
                    warn!(job_id = %job_id, file = %name, error = %e, "not a junit report");
                    None
                }
            }
        } else {
            None
        };

        let record = self
            .files
            .create(NewFile {
                name,
                mime: upload.mime,
                size: upload.content.len() as i64,
                job_id,
                team_id: job.team_id.into(),
                result,
            })
            .await?;

        info!(
            job_id = %job_id,
            file_id = %record.id,
            size = record.size,
            has_result = record.result.is_some(),
            "file attached"
        );
        Ok(record)
    }

    /// Result summaries of a job's files, oldest first.
    pub async fn results(&self, caller: &Caller, job_id: ResourceId) -> Result<Vec<JobResult>> {
        self.jobs.get(job_id, caller.team_scope()).await?;
        let files = self.files.list_for_job(job_id).await?;

        let mut results = Vec::new();
        for file in files {
            let Some(result) = file.result else {
                continue;
            };
            let summary: JunitSummary = serde_json::from_value(result)
                .map_err(|e| Error::Internal(format!("file {}: {}", file.id, e)))?;
            results.push(JobResult {
                file_id: file.id,
                job_id: file.job_id,
                name: file.name,
                created_at: file.created_at,
                summary,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    const JUNIT: &str = r#"<testsuite name="smoke" tests="3">
  <testcase name="a" time="1.5"/>
  <testcase name="b" time="0.5"><failure message="nope"/></testcase>
  <testcase name="c"><skipped/></testcase>
</testsuite>"#;

    async fn job_id(f: &Fixture) -> ResourceId {
        f.scheduler()
            .schedule(&f.user, f.schedule_request())
            .await
            .unwrap()
            .job
            .id
            .into()
    }

    #[tokio::test]
    async fn test_junit_upload_produces_result() {
        let f = Fixture::with_components();
        let id = job_id(&f).await;
        let service = f.file_service();

        let file = service
            .attach(
                &f.user,
                id,
                FileUpload {
                    name: Some("tempest.xml".into()),
                    mime: Some("application/junit".into()),
                    content: JUNIT.as_bytes(),
                },
            )
            .await
            .unwrap();
        assert_eq!(file.size, JUNIT.len() as i64);

        let results = service.results(&f.user, id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].summary,
            JunitSummary {
                total: 3,
                success: 1,
                skips: 1,
                failures: 1,
                errors: 0,
                time: 2000,
            }
        );
    }

    #[tokio::test]
    async fn test_empty_junit_counts_zero() {
        let f = Fixture::with_components();
        let id = job_id(&f).await;
        let service = f.file_service();
        service
            .attach(
                &f.user,
                id,
                FileUpload {
                    name: Some("empty.xml".into()),
                    mime: Some("application/junit".into()),
                    content: b"",
                },
            )
            .await
            .unwrap();

        let results = service.results(&f.user, id).await.unwrap();
        assert_eq!(results[0].summary.total, 0);
    }

    #[tokio::test]
    async fn test_plain_files_have_no_result() {
        let f = Fixture::with_components();
        let id = job_id(&f).await;
        let service = f.file_service();
        let file = service
            .attach(
                &f.user,
                id,
                FileUpload {
                    name: Some("console.log".into()),
                    mime: Some("text/plain".into()),
                    content: b"hello",
                },
            )
            .await
            .unwrap();
        assert!(file.result.is_none());
        assert!(service.results(&f.user, id).await.unwrap().is_empty());
        assert_eq!(f.query().files(&f.user, id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_requires_name_and_ownership() {
        let f = Fixture::with_components();
        let id = job_id(&f).await;
        let service = f.file_service();

        let err = service
            .attach(
                &f.user,
                id,
                FileUpload {
                    name: None,
                    mime: None,
                    content: b"x",
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        let err = service
            .attach(
                &f.stranger,
                id,
                FileUpload {
                    name: Some("x.txt".into()),
                    mime: None,
                    content: b"x",
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }
}
