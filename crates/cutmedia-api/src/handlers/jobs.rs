//! Job handlers: upload, status, logs, download and management.

use std::io::ErrorKind;
use std::path::Path;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path as UrlPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use cutmedia_models::{Job, JobId, JobParameters, JobStatus};
use cutmedia_runner::{persist_upload, tail_log, JobPaths, JobSubmission, RunnerError};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

// ============================================================================
// Job view
// ============================================================================

/// Job snapshot as returned to clients, with the derived download flag.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    /// True only when the output may be downloaded
    pub output_ready: bool,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let output_ready = job.output_ready();
        Self { job, output_ready }
    }
}

// ============================================================================
// Submit
// ============================================================================

/// Fields collected from the upload form.
#[derive(Default)]
struct UploadForm {
    parameters: JobParameters,
    file_name: Option<String>,
    video_bytes: Option<u64>,
}

/// Accept a video upload and start processing it.
///
/// POST /api/process
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<JobView>> {
    let id = JobId::new();
    let paths = state.paths().resolve(&id)?;

    let form = match read_upload_form(&mut multipart, &paths).await {
        Ok(form) => form,
        Err(e) => {
            discard_staged(&id, &paths).await;
            return Err(e);
        }
    };

    let Some(video_bytes) = form.video_bytes else {
        discard_staged(&id, &paths).await;
        return Err(ApiError::bad_request("A video file is required"));
    };

    let submission = JobSubmission::new(id.clone(), form.parameters).with_file_name(form.file_name);
    let job = match state.launcher.start(submission).await {
        Ok(job) => job,
        Err(e) => {
            discard_staged(&id, &paths).await;
            return Err(e.into());
        }
    };

    metrics::record_upload_bytes(video_bytes);
    info!(job_id = %id, bytes = video_bytes, "Job submitted");

    Ok(Json(job.into()))
}

async fn read_upload_form(multipart: &mut Multipart, paths: &JobPaths) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&e))? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                form.file_name = field.file_name().map(str::to_string);
                let written = persist_field(field, &paths.input).await?;
                form.video_bytes = Some(written).filter(|n| *n > 0);
            }
            "calibration" => {
                // Browsers send an empty part for an unused file input
                if persist_field(field, &paths.calibration).await? == 0 {
                    remove_if_present(&paths.calibration).await?;
                }
            }
            "model" | "modelPath" => {
                form.parameters = form.parameters.with_model(&field_text(field).await?);
            }
            "fps" => {
                form.parameters = form.parameters.with_fps(&field_text(field).await?);
            }
            "maxframes" => {
                form.parameters = form.parameters.with_max_frames(&field_text(field).await?);
            }
            "classes" => {
                form.parameters = form.parameters.with_classes(&field_text(field).await?);
            }
            other => debug!("Ignoring unknown form field '{}'", other),
        }
    }

    Ok(form)
}

/// Stream one multipart file field to disk without buffering it in memory.
async fn persist_field(field: Field<'_>, path: &Path) -> ApiResult<u64> {
    let reader = StreamReader::new(field.map_err(std::io::Error::other));
    tokio::pin!(reader);

    persist_upload(path, &mut reader).await.map_err(upload_error)
}

async fn remove_if_present(path: &Path) -> ApiResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RunnerError::from(e).into()),
    }
}

async fn field_text(field: Field<'_>) -> ApiResult<String> {
    field.text().await.map_err(|e| multipart_error(&e))
}

fn multipart_error(e: &MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::bad_request(format!("Malformed multipart body: {}", e.body_text()))
    }
}

/// Body errors surface wrapped in an IO error; report those as client errors.
fn upload_error(e: RunnerError) -> ApiError {
    if let RunnerError::Io(ref io) = e {
        if let Some(inner) = io
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
        {
            return multipart_error(inner);
        }
    }
    e.into()
}

async fn discard_staged(id: &JobId, paths: &JobPaths) {
    if let Err(e) = paths.remove_all().await {
        warn!(job_id = %id, "Failed to remove staged upload: {}", e);
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub id: Option<String>,
}

/// Get a job snapshot by query parameter.
///
/// GET /api/process?id=
pub async fn get_job_status(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> ApiResult<Json<JobView>> {
    let id = parse_job_id(query.id.as_deref())?;
    find_job(&state, &id).map(|job| Json(job.into()))
}

/// Get a job snapshot by path.
///
/// GET /api/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<JobView>> {
    let id = parse_job_id(Some(&job_id))?;
    find_job(&state, &id).map(|job| Json(job.into()))
}

fn parse_job_id(raw: Option<&str>) -> ApiResult<JobId> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing job id"))?;
    JobId::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid job id"))
}

fn find_job(state: &AppState, id: &JobId) -> ApiResult<Job> {
    state
        .store()
        .get(id)
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

// ============================================================================
// List
// ============================================================================

/// Condensed job view for listings.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub stage: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            stage: job.stage,
            progress: job.progress,
            file_name: job.file_name,
            error: job.error,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
}

/// List all known jobs, newest first.
///
/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs: Vec<JobSummary> = state.store().list().into_iter().map(Into::into).collect();
    let total = jobs.len();
    Json(JobListResponse { jobs, total })
}

// ============================================================================
// Cancel / Delete
// ============================================================================

/// Stop a queued or running job. The job ends in `error`.
///
/// POST /api/jobs/:job_id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<JobView>> {
    let id = parse_job_id(Some(&job_id))?;
    let job = find_job(&state, &id)?;

    if job.is_terminal() || !state.launcher.cancel(&id) {
        return Err(ApiError::conflict(format!(
            "Job already finished with status {}",
            state.store().get(&id).map(|j| j.status).unwrap_or(job.status)
        )));
    }

    info!(job_id = %id, "Job cancellation requested");
    let job = state
        .launcher
        .wait(&id)
        .await
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    Ok(Json(job.into()))
}

#[derive(Debug, Serialize)]
pub struct DeleteJobResponse {
    pub success: bool,
    pub id: JobId,
}

/// Delete a job and all of its files, cancelling it first if needed.
///
/// DELETE /api/jobs/:job_id
pub async fn delete_job(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<DeleteJobResponse>> {
    let id = parse_job_id(Some(&job_id))?;

    match state.launcher.delete(&id).await? {
        Some(_) => {
            info!(job_id = %id, "Job deleted");
            Ok(Json(DeleteJobResponse { success: true, id }))
        }
        None => Err(ApiError::not_found("Job not found")),
    }
}

// ============================================================================
// Download
// ============================================================================

/// Stream the processed video.
///
/// GET /api/download?id=
pub async fn download_output(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> ApiResult<Response> {
    let id = parse_job_id(query.id.as_deref())?;
    let job = find_job(&state, &id)?;

    if !job.output_ready() {
        return Err(ApiError::not_found(format!(
            "Output not ready (status: {})",
            job.status
        )));
    }

    let path = state.paths().paths_for(&id).output;
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found("Output file missing"));
        }
        Err(e) => return Err(RunnerError::from(e).into()),
    };
    let length = file.metadata().await.map_err(RunnerError::from)?.len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, length)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{id}.mp4\""),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

// ============================================================================
// Logs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub id: Option<String>,
    /// Bytes from the end of the log; unparsable values fall back to the default
    pub tail: Option<String>,
}

/// Return the tail of a job's worker log.
///
/// GET /api/logs?id=&tail=
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Response> {
    let id = parse_job_id(query.id.as_deref())?;
    let tail = state
        .config
        .log_tail(query.tail.as_deref().and_then(|t| t.trim().parse().ok()));

    let log = tail_log(state.paths().paths_for(&id).log, tail).await?;

    match log {
        Some(text) if !text.is_empty() => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response()),
        _ => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
