//! Mentor thumbnail and virtual background uploads.

use std::sync::Arc;

use answerflow_core::{MentorImage, MentorImageUpload};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::mentors::{MentorImageForm, MentorImageResponse};
use crate::state::AppState;

/// Multipart field holding the image.
const IMAGE_FIELD: &str = "image";

#[derive(OpenApi)]
#[openapi(
    paths(upload_thumbnail, upload_virtual_background),
    components(schemas(MentorImageForm, MentorImageResponse))
)]
pub struct MentorsApi;

pub fn router(max_image_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/mentors/{mentor}/thumbnail", post(upload_thumbnail))
        .route("/mentors/{mentor}/virtual-background", post(upload_virtual_background))
        .layer(DefaultBodyLimit::max(max_image_bytes))
}

/// Replace the mentor's thumbnail with a PNG image.
#[utoipa::path(
    post,
    path = "/v1/mentors/{mentor}/thumbnail",
    tag = "mentors",
    params(("mentor" = String, Path, description = "Mentor id")),
    request_body(content = MentorImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Thumbnail stored", body = MentorImageResponse),
        (status = 400, description = "Missing, malformed or non-PNG image"),
        (status = 413, description = "Image too large"),
    )
)]
pub async fn upload_thumbnail(
    State(state): State<Arc<AppState>>,
    Path(mentor): Path<String>,
    multipart: Multipart,
) -> Result<Json<MentorImageResponse>, ServerError> {
    store_image(&state, mentor, MentorImage::Thumbnail, multipart).await
}

/// Replace the mentor's virtual background with a PNG or JPEG image.
#[utoipa::path(
    post,
    path = "/v1/mentors/{mentor}/virtual-background",
    tag = "mentors",
    params(("mentor" = String, Path, description = "Mentor id")),
    request_body(content = MentorImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Virtual background stored", body = MentorImageResponse),
        (status = 400, description = "Missing, malformed or unsupported image"),
        (status = 413, description = "Image too large"),
    )
)]
pub async fn upload_virtual_background(
    State(state): State<Arc<AppState>>,
    Path(mentor): Path<String>,
    multipart: Multipart,
) -> Result<Json<MentorImageResponse>, ServerError> {
    store_image(&state, mentor, MentorImage::VirtualBackground, multipart).await
}

async fn store_image(
    state: &AppState,
    mentor: String,
    image: MentorImage,
    mut multipart: Multipart,
) -> Result<Json<MentorImageResponse>, ServerError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            debug!(field = ?field.name(), "skipping multipart field");
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_owned();
        let body = field.bytes().await?;
        let upload = MentorImageUpload {
            mentor,
            image,
            content_type,
            body,
        };
        let receipt = answerflow_core::upload_image(state.services(), upload, Utc::now()).await?;
        return Ok(Json(receipt.into()));
    }
    Err(ServerError::BadRequest(format!(
        "missing multipart field '{IMAGE_FIELD}'"
    )))
}
