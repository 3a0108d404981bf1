//! Routes starting song generations and tracking background jobs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;

use super::state::{GuardedGenerationJobs, ServerState};
use crate::generation::{
    GenerationError, GenerationOutcome, GenerationService, JobError, JobSnapshot,
};
use crate::remote::{Captions, GenerationRequest};

pub const CACHE_ROUTE_PREFIX: &str = "/cache";

#[derive(Serialize)]
struct GenerateResponse {
    task_id: String,
    music_url: String,
    filename: String,
    local_asset_path: PathBuf,
    size_bytes: u64,
    mime_type: String,
    duration: Option<f64>,
    audio_captions: Option<Captions>,
}

impl From<GenerationOutcome> for GenerateResponse {
    fn from(outcome: GenerationOutcome) -> Self {
        GenerateResponse {
            music_url: format!("{}/{}", CACHE_ROUTE_PREFIX, outcome.filename),
            task_id: outcome.task_id,
            filename: outcome.filename,
            local_asset_path: outcome.local_asset_path,
            size_bytes: outcome.size_bytes,
            mime_type: outcome.mime_type,
            duration: outcome.duration,
            audio_captions: outcome.captions,
        }
    }
}

#[derive(Serialize)]
struct JobCreatedResponse {
    job_id: String,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: String,
    stage: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<&'a str>,
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let status = match self {
            GenerationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GenerationError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            stage: self.stage(),
            raw: self.raw_payload(),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = match self {
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::AlreadyFinished(_) => StatusCode::CONFLICT,
        };
        (status, self.to_string()).into_response()
    }
}

/// Runs the whole pipeline and answers once the audio is cached.
async fn generate_music(
    State(state): State<ServerState>,
    Json(request): Json<GenerationRequest>,
) -> Response {
    if let Err(err) = GenerationService::validate(&request) {
        return err.into_response();
    }

    // A dropped connection cancels the spawned pipeline through the guard.
    let cancel = state.shutdown.child_token();
    let _abandon_guard = cancel.clone().drop_guard();
    let service = state.generation.clone();
    let handle = tokio::spawn(async move { service.generate(&request, &cancel).await });

    match handle.await {
        Ok(Ok(outcome)) => Json(GenerateResponse::from(outcome)).into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(err) => {
            error!("Generation task did not complete: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn start_job(
    State(jobs): State<GuardedGenerationJobs>,
    Json(request): Json<GenerationRequest>,
) -> Response {
    if let Err(err) = GenerationService::validate(&request) {
        return err.into_response();
    }
    let job_id = jobs.start(request);
    (StatusCode::ACCEPTED, Json(JobCreatedResponse { job_id })).into_response()
}

async fn get_job(
    State(jobs): State<GuardedGenerationJobs>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, JobError> {
    jobs.get(&id).map(Json).ok_or(JobError::NotFound(id))
}

async fn cancel_job(
    State(jobs): State<GuardedGenerationJobs>,
    Path(id): Path<String>,
) -> Result<StatusCode, JobError> {
    jobs.cancel(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn make_generation_routes(state: ServerState) -> Router {
    Router::new()
        .route("/generate", post(generate_music))
        .route("/jobs", post(start_job))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .with_state(state)
}
