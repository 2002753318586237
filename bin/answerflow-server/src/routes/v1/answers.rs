//! Answer upload, progress and subtitle endpoints.

use std::sync::Arc;

use answerflow_core::stages::subtitles;
use answerflow_core::{PipelineError, SubmissionKey};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::answers::{
    LiveWorkflow, MediaResponse, SubmissionResponse, TaskResponse, TaskSetResponse, TaskSummary,
    TrimRange, UploadAnswerRequest, UploadUrlBody, UploadUrlResponse, VttResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(upload_url, upload_answer, get_status, cancel_upload, put_vtt, regenerate_vtt),
    components(schemas(
        UploadUrlBody,
        UploadUrlResponse,
        UploadAnswerRequest,
        TrimRange,
        SubmissionResponse,
        TaskSummary,
        TaskSetResponse,
        TaskResponse,
        MediaResponse,
        LiveWorkflow,
        VttResponse
    ))
)]
pub struct AnswersApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/answers/upload-url", post(upload_url))
        .route("/answers/upload", post(upload_answer))
        .route("/answers/{mentor}/{question}/status", get(get_status))
        .route("/answers/{mentor}/{question}/cancel", post(cancel_upload))
        .route("/answers/{mentor}/{question}/vtt", put(put_vtt))
        .route("/answers/{mentor}/{question}/vtt/regenerate", post(regenerate_vtt))
}

/// Sign a one-off url the client puts the raw video to before calling
/// `/v1/answers/upload`.
#[utoipa::path(
    post,
    path = "/v1/answers/upload-url",
    tag = "answers",
    request_body = UploadUrlBody,
    responses(
        (status = 200, description = "Signed upload", body = UploadUrlResponse),
        (status = 400, description = "Missing uploader or size out of range"),
        (status = 501, description = "The blob backend cannot sign uploads"),
    )
)]
pub async fn upload_url(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UploadUrlBody>,
) -> Result<Json<UploadUrlResponse>, ServerError> {
    let signed = answerflow_core::presign_upload(state.services(), body.into()).await?;
    Ok(Json(signed.into()))
}

/// Accept an upload and start its processing workflow.
///
/// Returns once the task set exists; the stages run in the background.
#[utoipa::path(
    post,
    path = "/v1/answers/upload",
    tag = "answers",
    request_body = UploadAnswerRequest,
    responses(
        (status = 202, description = "Workflow queued", body = SubmissionResponse),
        (status = 400, description = "Invalid or unsupported upload"),
        (status = 404, description = "Upload object not found"),
        (status = 409, description = "An upload for this answer is still in progress"),
        (status = 503, description = "Orchestrator queue full"),
    )
)]
pub async fn upload_answer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadAnswerRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ServerError> {
    let receipt = answerflow_core::submit(&state.orchestrator, req.into()).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

#[utoipa::path(
    get,
    path = "/v1/answers/{mentor}/{question}/status",
    tag = "answers",
    params(
        ("mentor" = String, Path, description = "Mentor id"),
        ("question" = String, Path, description = "Question id")
    ),
    responses(
        (status = 200, description = "Task set", body = TaskSetResponse),
        (status = 404, description = "No upload for this answer"),
        (status = 500, description = "Store error"),
    )
)]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path((mentor, question)): Path<(String, String)>,
) -> Result<Json<TaskSetResponse>, ServerError> {
    let key = SubmissionKey::new(mentor, question);
    let set = state
        .services()
        .store
        .fetch_task_set(&key)
        .await
        .map_err(PipelineError::from)?
        .ok_or_else(|| ServerError::NotFound(format!("no upload for {key}")))?;
    let live = state.orchestrator.storage().snapshot(&key).await;
    Ok(Json(TaskSetResponse::new(set, live)))
}

/// Cancel every unfinished task of the answer's upload.
///
/// Tasks that already finished keep their status.
#[utoipa::path(
    post,
    path = "/v1/answers/{mentor}/{question}/cancel",
    tag = "answers",
    params(
        ("mentor" = String, Path, description = "Mentor id"),
        ("question" = String, Path, description = "Question id")
    ),
    responses(
        (status = 200, description = "Task set after cancellation", body = TaskSetResponse),
        (status = 404, description = "No upload for this answer"),
        (status = 503, description = "Orchestrator shut down"),
    )
)]
pub async fn cancel_upload(
    State(state): State<Arc<AppState>>,
    Path((mentor, question)): Path<(String, String)>,
) -> Result<Json<TaskSetResponse>, ServerError> {
    let key = SubmissionKey::new(mentor, question);
    let set = state.orchestrator.cancel(&key).await?;
    info!(%key, "upload cancelled");
    let live = state.orchestrator.storage().snapshot(&key).await;
    Ok(Json(TaskSetResponse::new(set, live)))
}

/// Replace the answer's subtitles with the WebVTT document in the body.
#[utoipa::path(
    put,
    path = "/v1/answers/{mentor}/{question}/vtt",
    tag = "answers",
    params(
        ("mentor" = String, Path, description = "Mentor id"),
        ("question" = String, Path, description = "Question id")
    ),
    request_body(content = String, content_type = "text/vtt"),
    responses(
        (status = 200, description = "Subtitles stored", body = VttResponse),
        (status = 400, description = "Not a WebVTT document"),
    )
)]
pub async fn put_vtt(
    State(state): State<Arc<AppState>>,
    Path((mentor, question)): Path<(String, String)>,
    body: String,
) -> Result<Json<VttResponse>, ServerError> {
    let key = SubmissionKey::new(mentor, question);
    let receipt = subtitles::store_vtt(state.services(), &key, &body).await?;
    Ok(Json(receipt.into()))
}

/// Rebuild the subtitles from the stored transcript.
#[utoipa::path(
    post,
    path = "/v1/answers/{mentor}/{question}/vtt/regenerate",
    tag = "answers",
    params(
        ("mentor" = String, Path, description = "Mentor id"),
        ("question" = String, Path, description = "Question id")
    ),
    responses(
        (status = 200, description = "Subtitles rebuilt", body = VttResponse),
        (status = 400, description = "The answer has no transcript"),
        (status = 404, description = "Answer or web video not found"),
    )
)]
pub async fn regenerate_vtt(
    State(state): State<Arc<AppState>>,
    Path((mentor, question)): Path<(String, String)>,
) -> Result<Json<VttResponse>, ServerError> {
    let key = SubmissionKey::new(mentor, question);
    let receipt = subtitles::regenerate_vtt(state.services(), &key).await?;
    Ok(Json(receipt.into()))
}
