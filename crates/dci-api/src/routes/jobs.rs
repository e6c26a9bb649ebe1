//! Job endpoints.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, ETAG, IF_MATCH, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use dci_core::query::ListQuery;
use dci_core::{AgentMetadata, Etag, ResourceId};
use dci_scheduler::{CreateRequest, CreatedJob, FileUpload, JobPatch, ScheduleRequest, StateReport};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::auth::Authenticated;
use crate::error::ApiError;

const CLIENT_VERSION: &str = "client-version";
const DCI_NAME: &str = "dci-name";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/schedule", post(schedule_job))
        .route("/jobs/search", post(search_jobs))
        .route(
            "/jobs/{id}",
            get(get_job).put(update_job).delete(delete_job),
        )
        .route("/jobs/{id}/recheck", post(recheck_job))
        .route("/jobs/{id}/components", get(job_components))
        .route(
            "/jobs/{id}/jobstates",
            get(job_jobstates).post(report_jobstate),
        )
        .route("/jobs/{id}/files", get(job_files).post(upload_file))
        .route("/jobs/{id}/results", get(job_results))
}

fn job_id(raw: &str) -> Result<ResourceId, ApiError> {
    Ok(ResourceId::parse_for("job", raw)?)
}

fn header_string(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn if_match(headers: &HeaderMap) -> Option<Etag> {
    headers
        .get(IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .and_then(Etag::from_header)
}

fn listing(key: &str, items: Vec<Value>, count: i64) -> Json<Value> {
    let mut body = json!({ "_meta": { "count": count } });
    body[key] = Value::Array(items);
    Json(body)
}

fn serialize_all<T: serde::Serialize>(items: &[T]) -> Result<Vec<Value>, ApiError> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(|e| ApiError::Internal(e.to_string())))
        .collect()
}

fn created(job: CreatedJob) -> Response {
    let etag = job.job.etag.clone();
    (
        StatusCode::CREATED,
        [(ETAG, etag)],
        Json(json!({ "job": job })),
    )
        .into_response()
}

async fn list_jobs(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let page = state.query.list(&caller, &query).await?;
    Ok(listing("jobs", page.jobs, page.count))
}

async fn create_job(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    let job = state.scheduler.create(&caller, request).await?;
    Ok(created(job))
}

#[derive(Debug, Deserialize)]
struct ScheduleBody {
    remoteci_id: ResourceId,
    topic_id: ResourceId,
}

async fn schedule_job(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    headers: HeaderMap,
    body: Result<Json<ScheduleBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let request = ScheduleRequest {
        remoteci_id: body.remoteci_id,
        topic_id: body.topic_id,
        agent: AgentMetadata {
            user_agent: header_string(&headers, USER_AGENT),
            client_version: header_string(&headers, CLIENT_VERSION),
        },
    };
    let job = state.scheduler.schedule(&caller, request).await?;
    Ok(created(job))
}

async fn search_jobs(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let page = state.query.search(&caller, &body).await?;
    Ok(listing("jobs", page.jobs, page.count))
}

#[derive(Debug, Default, Deserialize)]
struct EmbedQuery {
    embed: Option<String>,
}

async fn get_job(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    query: Result<Query<EmbedQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (job, etag) = state
        .query
        .get(&caller, job_id(&id)?, query.embed.as_deref())
        .await?;
    Ok(([(ETAG, etag)], Json(json!({ "job": job }))).into_response())
}

async fn update_job(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<JobPatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = job_id(&id)?;
    let Json(patch) = body?;
    let job = state
        .mutator
        .update(&caller, id, if_match(&headers), patch)
        .await?;
    Ok((StatusCode::NO_CONTENT, [(ETAG, job.etag)]).into_response())
}

async fn delete_job(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state
        .mutator
        .delete(&caller, job_id(&id)?, if_match(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn recheck_job(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.scheduler.recheck(&caller, job_id(&id)?).await?;
    Ok(created(job))
}

async fn job_components(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let components = state.query.components(&caller, job_id(&id)?).await?;
    let count = components.len() as i64;
    Ok(listing("components", serialize_all(&components)?, count))
}

async fn job_jobstates(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let jobstates = state.query.jobstates(&caller, job_id(&id)?).await?;
    let count = jobstates.len() as i64;
    Ok(listing("jobstates", serialize_all(&jobstates)?, count))
}

async fn report_jobstate(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    body: Result<Json<StateReport>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = job_id(&id)?;
    let Json(report) = body?;
    let reported = state.mutator.report_state(&caller, id, report).await?;
    Ok((
        StatusCode::CREATED,
        [(ETAG, reported.job.etag)],
        Json(json!({ "jobstate": reported.jobstate })),
    )
        .into_response())
}

async fn job_files(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let files = state.query.files(&caller, job_id(&id)?).await?;
    let count = files.len() as i64;
    Ok(listing("files", serialize_all(&files)?, count))
}

async fn upload_file(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let upload = FileUpload {
        name: header_string(&headers, DCI_NAME),
        mime: header_string(&headers, CONTENT_TYPE),
        content: &body,
    };
    let file = state.files.attach(&caller, job_id(&id)?, upload).await?;
    Ok((
        StatusCode::CREATED,
        [(ETAG, file.etag.clone())],
        Json(json!({ "file": file })),
    )
        .into_response())
}

async fn job_results(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let results = state.files.results(&caller, job_id(&id)?).await?;
    let count = results.len() as i64;
    Ok(listing("results", serialize_all(&results)?, count))
}
